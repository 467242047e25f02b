//! Supported resource types
//!
//! Each entry describes how the sandbox mints ids for a type, which
//! properties it insists on, which ones cannot change in place, and which
//! attributes `Fn::GetAtt` can read.

use serde_json::{Value, json};
use template::Environment;

/// How an attribute value is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derived {
    /// The external id
    Id,
    /// Copied from a property of the same resource
    Property(&'static str),
    /// `arn:<partition>:<service>:<region>:<account>:<path>/<id>`
    Arn,
    /// Load balancer style DNS name
    DnsName,
    /// Private link service name
    ServiceName,
    /// Public address from the documentation range
    PublicIp,
    /// A fixed literal
    Literal(&'static str),
}

/// One supported resource type
#[derive(Debug)]
pub struct TypeSpec {
    pub resource_type: &'static str,
    /// Prefix of minted ids (`vpc`, `subnet`, ...)
    pub id_prefix: &'static str,
    /// ARN service and resource path
    pub arn: (&'static str, &'static str),
    /// Whether `Ref` yields the ARN instead of the short id
    pub ref_is_arn: bool,
    pub required: &'static [&'static str],
    /// Changing any of these forces a replacement
    pub replace_on: &'static [&'static str],
    pub attributes: &'static [(&'static str, Derived)],
}

impl TypeSpec {
    pub fn requires_replacement(&self, property: &str) -> bool {
        self.replace_on.contains(&property)
    }

    /// Mint the external id for a fresh resource from a unique suffix
    pub fn external_id(&self, suffix: &str, env: &Environment) -> String {
        let short = format!("{}-{suffix}", self.id_prefix);
        if self.ref_is_arn {
            self.arn_for(&short, env)
        } else {
            short
        }
    }

    fn arn_for(&self, id: &str, env: &Environment) -> String {
        let (service, path) = self.arn;
        format!(
            "arn:{}:{service}:{}:{}:{path}/{id}",
            env.partition, env.region, env.account_id
        )
    }

    /// Attributes reported for a resource with `properties`
    pub fn derive_attributes(
        &self,
        external_id: &str,
        properties: &serde_json::Map<String, Value>,
        env: &Environment,
    ) -> serde_json::Map<String, Value> {
        let short = external_id.rsplit('/').next().unwrap_or(external_id);
        let mut attributes = serde_json::Map::new();
        for (name, derived) in self.attributes {
            let value = match derived {
                Derived::Id => Some(json!(external_id)),
                Derived::Property(p) => properties.get(*p).cloned(),
                Derived::Arn if self.ref_is_arn => Some(json!(external_id)),
                Derived::Arn => Some(json!(self.arn_for(short, env))),
                Derived::DnsName => Some(json!(format!(
                    "{short}.{}.elb.{}",
                    env.region, env.url_suffix
                ))),
                Derived::ServiceName => Some(json!(format!(
                    "com.amazonaws.vpce.{}.{short}",
                    env.region
                ))),
                Derived::PublicIp => Some(json!(public_ip(short))),
                Derived::Literal(v) => Some(json!(v)),
            };
            if let Some(value) = value {
                attributes.insert((*name).to_string(), value);
            }
        }
        attributes
    }
}

/// Deterministic address in 203.0.113.0/24
fn public_ip(id: &str) -> String {
    let hash = blake3::hash(id.as_bytes());
    format!("203.0.113.{}", hash.as_bytes()[0].max(1))
}

/// Look up a type
pub fn find(resource_type: &str) -> Option<&'static TypeSpec> {
    CATALOG.iter().find(|s| s.resource_type == resource_type)
}

/// Every supported type
pub fn all() -> &'static [TypeSpec] {
    CATALOG
}

/// Whether `value` has the shape of an id minted for some catalog type
pub fn looks_like_id(value: &str) -> bool {
    CATALOG.iter().any(|spec| {
        let short = value.rsplit('/').next().unwrap_or(value);
        short
            .strip_prefix(spec.id_prefix)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|hex| hex.len() == 17 && hex.chars().all(|c| c.is_ascii_hexdigit()))
    })
}

static CATALOG: &[TypeSpec] = &[
    TypeSpec {
        resource_type: "AWS::EC2::VPC",
        id_prefix: "vpc",
        arn: ("ec2", "vpc"),
        ref_is_arn: false,
        required: &["CidrBlock"],
        replace_on: &["CidrBlock", "InstanceTenancy"],
        attributes: &[
            ("VpcId", Derived::Id),
            ("CidrBlock", Derived::Property("CidrBlock")),
            ("DefaultSecurityGroup", Derived::Literal("sg-default")),
            ("DefaultNetworkAcl", Derived::Literal("acl-default")),
        ],
    },
    TypeSpec {
        resource_type: "AWS::EC2::Subnet",
        id_prefix: "subnet",
        arn: ("ec2", "subnet"),
        ref_is_arn: false,
        required: &["VpcId", "CidrBlock"],
        replace_on: &["VpcId", "CidrBlock", "AvailabilityZone"],
        attributes: &[
            ("SubnetId", Derived::Id),
            ("VpcId", Derived::Property("VpcId")),
            ("CidrBlock", Derived::Property("CidrBlock")),
            ("AvailabilityZone", Derived::Property("AvailabilityZone")),
        ],
    },
    TypeSpec {
        resource_type: "AWS::EC2::InternetGateway",
        id_prefix: "igw",
        arn: ("ec2", "internet-gateway"),
        ref_is_arn: false,
        required: &[],
        replace_on: &[],
        attributes: &[("InternetGatewayId", Derived::Id)],
    },
    TypeSpec {
        resource_type: "AWS::EC2::VPCGatewayAttachment",
        id_prefix: "igwattach",
        arn: ("ec2", "gateway-attachment"),
        ref_is_arn: false,
        required: &["VpcId"],
        replace_on: &["VpcId", "InternetGatewayId"],
        attributes: &[],
    },
    TypeSpec {
        resource_type: "AWS::EC2::RouteTable",
        id_prefix: "rtb",
        arn: ("ec2", "route-table"),
        ref_is_arn: false,
        required: &["VpcId"],
        replace_on: &["VpcId"],
        attributes: &[("RouteTableId", Derived::Id)],
    },
    TypeSpec {
        resource_type: "AWS::EC2::Route",
        id_prefix: "rtbroute",
        arn: ("ec2", "route"),
        ref_is_arn: false,
        required: &["RouteTableId"],
        replace_on: &["RouteTableId", "DestinationCidrBlock"],
        attributes: &[],
    },
    TypeSpec {
        resource_type: "AWS::EC2::SubnetRouteTableAssociation",
        id_prefix: "rtbassoc",
        arn: ("ec2", "route-table-association"),
        ref_is_arn: false,
        required: &["RouteTableId", "SubnetId"],
        replace_on: &["SubnetId"],
        attributes: &[("Id", Derived::Id)],
    },
    TypeSpec {
        resource_type: "AWS::EC2::EIP",
        id_prefix: "eipalloc",
        arn: ("ec2", "elastic-ip"),
        ref_is_arn: false,
        required: &[],
        replace_on: &["Domain"],
        attributes: &[
            ("AllocationId", Derived::Id),
            ("PublicIp", Derived::PublicIp),
        ],
    },
    TypeSpec {
        resource_type: "AWS::EC2::NatGateway",
        id_prefix: "nat",
        arn: ("ec2", "natgateway"),
        ref_is_arn: false,
        required: &["SubnetId"],
        replace_on: &["SubnetId", "AllocationId", "ConnectivityType"],
        attributes: &[("NatGatewayId", Derived::Id)],
    },
    TypeSpec {
        resource_type: "AWS::EC2::SecurityGroup",
        id_prefix: "sg",
        arn: ("ec2", "security-group"),
        ref_is_arn: false,
        required: &["GroupDescription"],
        replace_on: &["GroupDescription", "GroupName", "VpcId"],
        attributes: &[
            ("GroupId", Derived::Id),
            ("VpcId", Derived::Property("VpcId")),
        ],
    },
    TypeSpec {
        resource_type: "AWS::EC2::LaunchTemplate",
        id_prefix: "lt",
        arn: ("ec2", "launch-template"),
        ref_is_arn: false,
        required: &["LaunchTemplateData"],
        replace_on: &["LaunchTemplateName"],
        attributes: &[
            ("LaunchTemplateId", Derived::Id),
            ("DefaultVersionNumber", Derived::Literal("1")),
            ("LatestVersionNumber", Derived::Literal("1")),
        ],
    },
    TypeSpec {
        resource_type: "AWS::ElasticLoadBalancingV2::LoadBalancer",
        id_prefix: "lb",
        arn: ("elasticloadbalancing", "loadbalancer"),
        ref_is_arn: true,
        required: &[],
        replace_on: &["Name", "Scheme", "Type"],
        attributes: &[
            ("LoadBalancerArn", Derived::Arn),
            ("DNSName", Derived::DnsName),
            ("CanonicalHostedZoneID", Derived::Literal("Z35SXDOTRQ7X7K")),
            ("LoadBalancerName", Derived::Property("Name")),
        ],
    },
    TypeSpec {
        resource_type: "AWS::ElasticLoadBalancingV2::TargetGroup",
        id_prefix: "tg",
        arn: ("elasticloadbalancing", "targetgroup"),
        ref_is_arn: true,
        required: &[],
        replace_on: &["Name", "Port", "Protocol", "VpcId", "TargetType"],
        attributes: &[
            ("TargetGroupArn", Derived::Arn),
            ("TargetGroupName", Derived::Property("Name")),
        ],
    },
    TypeSpec {
        resource_type: "AWS::ElasticLoadBalancingV2::Listener",
        id_prefix: "listener",
        arn: ("elasticloadbalancing", "listener"),
        ref_is_arn: true,
        required: &["LoadBalancerArn", "DefaultActions"],
        replace_on: &["LoadBalancerArn"],
        attributes: &[("ListenerArn", Derived::Arn)],
    },
    TypeSpec {
        resource_type: "AWS::AutoScaling::AutoScalingGroup",
        id_prefix: "asg",
        arn: ("autoscaling", "autoScalingGroup"),
        ref_is_arn: false,
        required: &["MinSize", "MaxSize"],
        replace_on: &["AutoScalingGroupName"],
        attributes: &[],
    },
    TypeSpec {
        resource_type: "AWS::EC2::VPCEndpointService",
        id_prefix: "vpce-svc",
        arn: ("ec2", "vpc-endpoint-service"),
        ref_is_arn: false,
        required: &[],
        replace_on: &[],
        attributes: &[
            ("ServiceId", Derived::Id),
            ("ServiceName", Derived::ServiceName),
        ],
    },
    TypeSpec {
        resource_type: "AWS::EC2::VPCEndpoint",
        id_prefix: "vpce",
        arn: ("ec2", "vpc-endpoint"),
        ref_is_arn: false,
        required: &["VpcId", "ServiceName"],
        replace_on: &["VpcId", "ServiceName", "VpcEndpointType"],
        attributes: &[
            ("Id", Derived::Id),
            ("VpcId", Derived::Property("VpcId")),
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_entries_are_unique() {
        let mut types: Vec<_> = all().iter().map(|s| s.resource_type).collect();
        types.sort_unstable();
        types.dedup();
        assert_eq!(types.len(), all().len());
        assert_eq!(all().len(), 17);
    }

    #[test]
    fn test_ids_and_arns() {
        let env = Environment::default();
        let vpc = find("AWS::EC2::VPC").unwrap();
        assert_eq!(vpc.external_id("0123456789abcdef0", &env), "vpc-0123456789abcdef0");

        let lb = find("AWS::ElasticLoadBalancingV2::LoadBalancer").unwrap();
        let id = lb.external_id("0123456789abcdef0", &env);
        assert_eq!(
            id,
            "arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/lb-0123456789abcdef0"
        );
        assert!(looks_like_id(&id));
        assert!(looks_like_id("subnet-0123456789abcdef0"));
        assert!(!looks_like_id("subnet-xyz"));
        assert!(!looks_like_id("10.0.0.0/16"));
    }

    #[test]
    fn test_derived_attributes() {
        let env = Environment::default();
        let lb = find("AWS::ElasticLoadBalancingV2::LoadBalancer").unwrap();
        let id = lb.external_id("0123456789abcdef0", &env);
        let props = json!({"Name": "web"}).as_object().cloned().unwrap();
        let attrs = lb.derive_attributes(&id, &props, &env);
        assert_eq!(attrs["LoadBalancerArn"], json!(id));
        assert_eq!(
            attrs["DNSName"],
            json!("lb-0123456789abcdef0.us-east-1.elb.amazonaws.com")
        );
        assert_eq!(attrs["LoadBalancerName"], json!("web"));

        let subnet = find("AWS::EC2::Subnet").unwrap();
        let attrs = subnet.derive_attributes("subnet-1", &Default::default(), &env);
        assert_eq!(attrs.len(), 1);
        assert!(subnet.requires_replacement("CidrBlock"));
        assert!(!subnet.requires_replacement("Tags"));
    }
}
