//! The build-runner cluster, declared as data.
//!
//! Substrate: a VPC, the worker role with its managed policies, the cluster
//! and a managed nodegroup, the autoscaler policy, an image repository with a
//! user allowed to push to it, and an access key for that user. Workload: the
//! cluster autoscaler and, when configured, an ingress controller chart.

use crate::config::StackConfig;
use crate::error::StackError;
use serde_json::{json, Value as Json};
use strata_engine::OutputSpec;
use strata_graph::{ResourceDecl, Template, Value};

/// Node ids used by the stack
pub mod ids {
    /// Network the cluster runs in
    pub const VPC: &str = "vpc";
    /// Role assumed by worker instances
    pub const WORKER_ROLE: &str = "worker-role";
    /// Control plane
    pub const CLUSTER: &str = "cluster";
    /// Managed worker capacity
    pub const NODEGROUP: &str = "nodegroup";
    /// Permissions the autoscaler needs
    pub const AUTOSCALER_POLICY: &str = "autoscaler-policy";
    /// In-cluster autoscaler
    pub const AUTOSCALER_MANIFEST: &str = "autoscaler-manifest";
    /// Image repository
    pub const REPOSITORY: &str = "repo";
    /// User that pushes images
    pub const REPO_USER: &str = "repo-user";
    /// Pull/push grant for the repository user
    pub const REPO_USER_GRANT: &str = "repo-user-grant";
    /// Lets workers pull from the repository
    pub const WORKER_ECR_POLICY: &str = "worker-ecr-policy";
    /// Credentials of the repository user
    pub const ACCESS_KEY: &str = "repo-user-access-key";
    /// Optional ingress controller
    pub const INGRESS: &str = "ingress-controller";
}

/// Managed policies attached to the worker role
pub const WORKER_MANAGED_POLICIES: [&str; 3] = [
    "AmazonEKSWorkerNodePolicy",
    "AmazonEC2ContainerRegistryReadOnly",
    "AmazonEKS_CNI_Policy",
];

/// Actions the cluster autoscaler performs
pub const AUTOSCALER_ACTIONS: [&str; 7] = [
    "autoscaling:DescribeAutoScalingGroups",
    "autoscaling:DescribeAutoScalingInstances",
    "autoscaling:DescribeLaunchConfigurations",
    "autoscaling:DescribeTags",
    "autoscaling:SetDesiredCapacity",
    "autoscaling:TerminateInstanceInAutoScalingGroup",
    "ec2:DescribeLaunchTemplateVersions",
];

/// Repository actions granted to worker nodes
pub const WORKER_ECR_ACTIONS: [&str; 4] = [
    "ecr:BatchCheckLayerAvailability",
    "ecr:BatchGetImage",
    "ecr:GetDownloadUrlForLayer",
    "ecr:GetAuthorizationToken",
];

const PULL_PUSH_ACTIONS: [&str; 7] = [
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
    "ecr:PutImage",
    "ecr:InitiateLayerUpload",
    "ecr:UploadLayerPart",
    "ecr:CompleteLayerUpload",
];

const AUTOSCALER_MANIFEST: &str = include_str!("../assets/autoscaler-manifest.json");

/// Declarations and outputs of one stack
#[derive(Debug, Clone)]
pub struct Stack {
    /// Resource declarations, in declaration order
    pub declarations: Vec<ResourceDecl>,
    /// Outputs bound after a successful apply
    pub outputs: Vec<OutputSpec>,
}

/// Declare the stack described by `config`
///
/// # Errors
/// `StackError::Manifest` if the bundled autoscaler manifest is malformed.
pub fn declare_stack(config: &StackConfig) -> Result<Stack, StackError> {
    let name = config.cluster_name.as_str();
    let mut declarations = vec![
        ResourceDecl::new(ids::VPC, "ec2.vpc").property("name", format!("{name}-vpc")),
        ResourceDecl::new(ids::WORKER_ROLE, "iam.role")
            .property("name", format!("{name}-eks-worker-role"))
            .property("assumed_by", "ec2.amazonaws.com")
            .property("managed_policies", Value::list(WORKER_MANAGED_POLICIES)),
        ResourceDecl::new(ids::CLUSTER, "eks.cluster")
            .property("name", name)
            .property("version", config.kubernetes_version.as_str())
            .property("default_capacity", 0_u32)
            .property("vpc_id", Value::reference(ids::VPC, "id")),
        ResourceDecl::new(ids::NODEGROUP, "eks.nodegroup")
            .property("name", format!("{name}-capacity"))
            .property("cluster_name", Value::reference(ids::CLUSTER, "name"))
            .property("node_role", Value::reference(ids::WORKER_ROLE, "arn"))
            .property("instance_types", Value::list(config.instance_types.iter().cloned()))
            .property("ami_type", config.ami_type.as_str())
            .property("min_size", config.min_size)
            .property("max_size", config.max_size),
        ResourceDecl::new(ids::AUTOSCALER_POLICY, "iam.policy")
            .property("name", format!("{name}-autoscaler-policy"))
            .property("statements", statement(&AUTOSCALER_ACTIONS, "*"))
            .property("roles", Value::list([Value::reference(ids::WORKER_ROLE, "name")]))
            .attach_to(ids::NODEGROUP),
        ResourceDecl::workload(ids::AUTOSCALER_MANIFEST, "k8s.manifest", ids::CLUSTER)
            .property(
                "manifest",
                Template::new(bundled("autoscaler-manifest.json", AUTOSCALER_MANIFEST)?)
                    .bind("IMAGE_TAG", config.autoscaler_image_tag.as_str())
                    .bind("CLUSTER_NAME", Value::reference(ids::CLUSTER, "name")),
            )
            .requires(ids::AUTOSCALER_POLICY),
        ResourceDecl::new(ids::REPOSITORY, "ecr.repository")
            .property("name", format!("{name}-repo"))
            .property(
                "lifecycle_rules",
                Value::list([json!({ "max_image_age_days": config.max_image_age_days })]),
            ),
        ResourceDecl::new(ids::REPO_USER, "iam.user").property("name", format!("{name}-repo-user")),
        ResourceDecl::new(ids::REPO_USER_GRANT, "iam.policy")
            .property("name", format!("{name}-repo-user-pull-push"))
            .property(
                "statements",
                Value::list([
                    statement_on(&PULL_PUSH_ACTIONS, Value::reference(ids::REPOSITORY, "arn")),
                    statement_on(&["ecr:GetAuthorizationToken"], "*".into()),
                ]),
            )
            .property("users", Value::list([Value::reference(ids::REPO_USER, "name")]))
            .attach_to(ids::REPO_USER),
        ResourceDecl::new(ids::WORKER_ECR_POLICY, "iam.policy")
            .property("name", format!("{name}-worker-ecr"))
            .property(
                "statements",
                Value::list([statement_on(
                    &WORKER_ECR_ACTIONS,
                    Value::reference(ids::REPOSITORY, "arn"),
                )]),
            )
            .property("roles", Value::list([Value::reference(ids::WORKER_ROLE, "name")]))
            .attach_to(ids::WORKER_ROLE),
        ResourceDecl::new(ids::ACCESS_KEY, "iam.access_key")
            .property("user_name", Value::reference(ids::REPO_USER, "name")),
    ];

    if let Some(ingress) = &config.ingress {
        let mut chart = ResourceDecl::workload(ids::INGRESS, "helm.chart", ids::CLUSTER)
            .property("release", ingress.release.as_str())
            .property("repository", ingress.repository.as_str())
            .property("chart", ingress.chart.as_str())
            .property("namespace", ingress.namespace.as_str());
        if let Some(version) = &ingress.version {
            chart = chart.property("version", version.as_str());
        }
        declarations.push(chart);
    }

    let outputs = vec![
        OutputSpec::plain("accessKeyId", ids::ACCESS_KEY, "id"),
        OutputSpec::sensitive("secretAccessKey", ids::ACCESS_KEY, "secret_access_key"),
    ];

    Ok(Stack {
        declarations,
        outputs,
    })
}

fn bundled(name: &'static str, text: &str) -> Result<Json, StackError> {
    serde_json::from_str(text).map_err(|source| StackError::Manifest { name, source })
}

fn statement(actions: &[&str], resource: &str) -> Value {
    Value::list([statement_on(actions, resource.into())])
}

fn statement_on(actions: &[&str], resource: Value) -> Value {
    Value::map([
        ("effect", Value::from("Allow")),
        ("actions", Value::list(actions.iter().copied())),
        ("resources", Value::list([resource])),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngressChart;
    use strata_graph::{GraphBuilder, NodeId, Phase};

    fn decl<'a>(stack: &'a Stack, id: &str) -> &'a ResourceDecl {
        stack
            .declarations
            .iter()
            .find(|d| d.id.as_str() == id)
            .unwrap()
    }

    #[test]
    fn bundled_manifest_parses() {
        assert!(bundled("autoscaler-manifest.json", AUTOSCALER_MANIFEST).is_ok());
    }

    #[test]
    fn autoscaler_manifest_binds_both_placeholders() {
        let stack = declare_stack(&StackConfig::new()).unwrap();
        let manifest = decl(&stack, ids::AUTOSCALER_MANIFEST);
        assert_eq!(manifest.phase, Phase::Workload);
        assert_eq!(manifest.cluster, Some(NodeId::new(ids::CLUSTER)));

        let Some(Value::Template(template)) = manifest.properties.get("manifest") else {
            panic!("manifest is not a template");
        };
        let placeholders: Vec<&str> = template.placeholders().collect();
        assert_eq!(placeholders, vec!["CLUSTER_NAME", "IMAGE_TAG"]);
        assert_eq!(template.unbound().count(), 0);
    }

    #[test]
    fn names_are_prefixed_with_the_cluster_name() {
        let stack = declare_stack(&StackConfig::new().with_cluster_name("ci")).unwrap();
        assert_eq!(
            decl(&stack, ids::WORKER_ROLE).properties["name"],
            Value::from("ci-eks-worker-role")
        );
        assert_eq!(decl(&stack, ids::REPOSITORY).properties["name"], Value::from("ci-repo"));
    }

    #[test]
    fn ingress_is_optional() {
        let without = declare_stack(&StackConfig::new()).unwrap();
        assert!(without.declarations.iter().all(|d| d.id.as_str() != ids::INGRESS));

        let with = declare_stack(&StackConfig::new().with_ingress(IngressChart {
            release: "ingress-nginx".into(),
            repository: "https://kubernetes.github.io/ingress-nginx".into(),
            chart: "ingress-nginx".into(),
            version: Some("4.0.1".into()),
            namespace: "ingress".into(),
        }))
        .unwrap();
        let chart = decl(&with, ids::INGRESS);
        assert_eq!(chart.phase, Phase::Workload);
        assert_eq!(chart.properties["version"], Value::from("4.0.1"));
    }

    #[test]
    fn secret_access_key_is_the_only_sensitive_output() {
        let stack = declare_stack(&StackConfig::new()).unwrap();
        let sensitive: Vec<&str> = stack
            .outputs
            .iter()
            .filter(|o| o.sensitive)
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(sensitive, vec!["secretAccessKey"]);
    }

    #[test]
    fn stack_builds() {
        let stack = declare_stack(&StackConfig::new()).unwrap();
        let mut builder = GraphBuilder::new();
        builder.extend(stack.declarations);
        let graph = builder.build().unwrap();
        assert_eq!(graph.nodes_in_phase(Phase::Workload).count(), 1);
        assert_eq!(graph.node_count(), 11);
    }
}
