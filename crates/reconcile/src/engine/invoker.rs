//! Provider calls with retry, timeout and error classification

use crate::context::CancelToken;
use crate::error::{Error, Result};
use crate::provider::{
    Attributes, CreateRequest, Created, Properties, Provider, ProviderError, call_with_timeout,
};
use crate::retry::{RetryCallback, RetryConfig, with_retry};
use crate::types::{EngineOptions, Operation};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a call once every timed-out attempt has finished
pub(crate) struct Settled<T> {
    pub result: Result<T>,
    /// An abandoned attempt that succeeded although the call failed
    pub late: Option<T>,
}

impl<T> Settled<T> {
    /// Count a late success as the call's result
    pub fn accept_late(self) -> Result<T> {
        match (self.result, self.late) {
            (Err(e), Some(value)) => {
                log::warn!("Completed after timing out: {e}");
                Ok(value)
            }
            (result, _) => result,
        }
    }
}

/// Calls one provider on behalf of one logical resource
///
/// Cheap to clone; clones are moved into worker tasks.
#[derive(Clone)]
pub(crate) struct Invoker {
    provider: Arc<dyn Provider>,
    logical_name: String,
    retry: RetryConfig,
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl Invoker {
    pub fn new(
        provider: Arc<dyn Provider>,
        logical_name: &str,
        options: &EngineOptions,
        cancel: Option<CancelToken>,
    ) -> Self {
        Self {
            provider,
            logical_name: logical_name.to_string(),
            retry: options.retry.clone(),
            timeout: options.operation_timeout,
            cancel,
        }
    }

    pub fn create(&self, request: CreateRequest) -> Settled<Created> {
        let request = Arc::new(request);
        self.settle(Operation::Create, move |p| p.create(&request))
    }

    /// Attributes of a physical resource, `None` if it no longer exists
    pub fn read(&self, external_id: &str) -> Result<Option<Attributes>> {
        let id = external_id.to_string();
        self.settle(Operation::Read, move |p| match p.read(&id) {
            Ok(attributes) => Ok(Some(attributes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        })
        .accept_late()
    }

    pub fn update(&self, external_id: &str, properties: Properties) -> Settled<Attributes> {
        let id = external_id.to_string();
        self.settle(Operation::Update, move |p| p.update(&id, &properties))
    }

    /// Delete a physical resource; one that is already gone counts as deleted
    pub fn delete(&self, external_id: &str) -> Result<()> {
        let id = external_id.to_string();
        self.settle(Operation::Delete, move |p| match p.delete(&id) {
            Err(e) if e.is_not_found() => {
                log::debug!("{id} was already gone");
                Ok(())
            }
            other => other,
        })
        .accept_late()
    }

    /// Retry `f`; on failure, wait out every attempt that timed out
    fn settle<T, F>(&self, operation: Operation, f: F) -> Settled<T>
    where
        T: Send + 'static,
        F: Fn(&dyn Provider) -> std::result::Result<T, ProviderError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let callback = LogRetry {
            logical_name: &self.logical_name,
            operation,
        };
        let mut abandoned = Vec::new();
        let result = with_retry(&self.retry, Some(&callback), self.cancel.as_ref(), || {
            let provider = Arc::clone(&self.provider);
            let f = Arc::clone(&f);
            call_with_timeout(self.timeout, &mut abandoned, move || f(provider.as_ref()))
        });

        // Nothing stays in flight once a failure is reported
        let mut late = None;
        if result.is_err() {
            for call in abandoned {
                match call.join() {
                    Ok(value) if late.is_none() => late = Some(value),
                    Ok(_) => {}
                    Err(e) => log::debug!("{operation} {} attempt failed late: {e}", self.logical_name),
                }
            }
        }

        Settled {
            result: result.map_err(|e| classify(&self.logical_name, operation, &e)),
            late,
        }
    }
}

/// Turn a provider error into an engine error naming the resource
fn classify(logical_name: &str, operation: Operation, error: &ProviderError) -> Error {
    if error.is_transient() {
        Error::ProviderTransient {
            logical_name: logical_name.to_string(),
            operation,
            message: error.to_string(),
        }
    } else {
        Error::ProviderFatal {
            logical_name: logical_name.to_string(),
            operation,
            message: error.to_string(),
        }
    }
}

/// Reports retries through the log
struct LogRetry<'a> {
    logical_name: &'a str,
    operation: Operation,
}

impl RetryCallback for LogRetry<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration) {
        log::warn!(
            "{} {} attempt {}/{} failed: {}. Retrying in {:.1}s",
            self.operation,
            self.logical_name,
            attempt,
            max_attempts,
            error,
            delay.as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProvider;
    use crate::types::EngineOptions;
    use serde_json::json;

    fn options() -> EngineOptions {
        EngineOptions {
            jobs: 2,
            operation_timeout: Some(Duration::from_millis(200)),
            retry: RetryConfig::new(3, Duration::from_millis(1), 1.0),
        }
    }

    fn request(token: &str) -> CreateRequest {
        CreateRequest {
            logical_name: "Vpc".into(),
            resource_type: "Test::Thing".into(),
            properties: json!({"Name": "a"}).as_object().cloned().unwrap(),
            idempotency_token: token.into(),
        }
    }

    #[test]
    fn test_transient_create_retried_once_created() {
        let provider = FakeProvider::new();
        provider.throttle_creates(2);
        let invoker = Invoker::new(provider.clone(), "Vpc", &options(), None);
        let created = invoker.create(request("t1")).result.unwrap();
        assert_eq!(provider.create_calls(), 3);
        assert_eq!(provider.live_resources(), 1);
        assert!(provider.exists(&created.external_id));
    }

    #[test]
    fn test_fatal_error_names_resource() {
        let provider = FakeProvider::new();
        provider.fail_create("Vpc");
        let invoker = Invoker::new(provider.clone(), "Vpc", &options(), None);
        let err = invoker.create(request("t1")).result.unwrap_err();
        assert!(matches!(
            err,
            Error::ProviderFatal { ref logical_name, operation: Operation::Create, .. } if logical_name == "Vpc"
        ));
        assert_eq!(provider.create_calls(), 1);
    }

    #[test]
    fn test_delete_of_missing_resource_succeeds() {
        let provider = FakeProvider::new();
        let invoker = Invoker::new(provider, "Vpc", &options(), None);
        invoker.delete("vpc-missing").unwrap();
        assert_eq!(invoker.read("vpc-missing").unwrap(), None);
    }

    #[test]
    fn test_timeout_exhausts_to_transient() {
        let provider = FakeProvider::with_delay(Duration::from_millis(300));
        let mut opts = options();
        opts.operation_timeout = Some(Duration::from_millis(10));
        opts.retry = RetryConfig::new(2, Duration::from_millis(1), 1.0);
        let invoker = Invoker::new(provider.clone(), "Vpc", &opts, None);
        let settled = invoker.create(request("t1"));
        assert!(settled.result.as_ref().unwrap_err().is_retryable());

        // Both attempts finished before the failure was reported
        let late = settled.late.unwrap();
        assert_eq!(provider.create_calls(), 2);
        assert_eq!(provider.live_resources(), 1);
        assert!(provider.exists(&late.external_id));
    }

    #[test]
    fn test_late_delete_counts_as_deleted() {
        let provider = FakeProvider::with_delay(Duration::from_millis(100));
        let created = Invoker::new(provider.clone(), "Vpc", &options(), None)
            .create(request("t1"))
            .result
            .unwrap();

        let mut opts = options();
        opts.operation_timeout = Some(Duration::from_millis(10));
        opts.retry = RetryConfig::no_retry();
        let invoker = Invoker::new(provider.clone(), "Vpc", &opts, None);
        invoker.delete(&created.external_id).unwrap();
        assert_eq!(provider.live_resources(), 0);
    }
}
