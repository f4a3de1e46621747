use crate::application::{Application, ApplicationDestination, ApplicationSpec};
use crate::errors::{Error, Result};
use kube::{
    runtime::reflector::{ObjectRef, Store},
    CustomResource,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Matches any repository, server or namespace
pub const WILDCARD: &str = "*";

/// Tenancy policy restricting what the Applications of a project may use.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "AppProject",
    group = "argoproj.io",
    version = "v1alpha1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AppProjectSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed repository URLs, `*` allows any of them
    #[serde(default)]
    pub source_repos: Vec<String>,
    /// Allowed destinations, each field can be `*`
    #[serde(default)]
    pub destinations: Vec<ApplicationDestination>,
}

impl AppProject {
    /// Whether Applications of the project may pull manifests from `repo_url`
    pub fn is_source_permitted(&self, repo_url: &str) -> bool {
        self.spec
            .source_repos
            .iter()
            .any(|allowed| allowed == WILDCARD || allowed == repo_url)
    }

    /// Whether Applications of the project may deploy to `destination`
    pub fn is_destination_permitted(&self, destination: &ApplicationDestination) -> bool {
        self.spec.destinations.iter().any(|allowed| {
            matches_pattern(&allowed.server, &destination.server)
                && matches_pattern(&allowed.namespace, &destination.namespace)
        })
    }
}

fn matches_pattern(pattern: &str, value: &str) -> bool {
    pattern == WILDCARD || pattern == value
}

/// Read access to a local cache of AppProject objects.
///
/// The cache is filled by an informer this crate does not manage, hence
/// lookups can return stale data.
pub trait ProjectLister {
    fn get_project(&self, namespace: &str, name: &str) -> Option<Arc<AppProject>>;
}

impl ProjectLister for Store<AppProject> {
    fn get_project(&self, namespace: &str, name: &str) -> Option<Arc<AppProject>> {
        self.get(&ObjectRef::new(name).within(namespace))
    }
}

/// Find the AppProject governing `spec` inside of the given `namespace`
pub fn get_app_project(
    spec: &ApplicationSpec,
    lister: &impl ProjectLister,
    namespace: &str,
) -> Result<Arc<AppProject>> {
    let name = spec.project_name();
    debug!(project = name, namespace, "looking up project");
    lister
        .get_project(namespace, name)
        .ok_or_else(|| Error::NotFound {
            kind: "AppProject",
            name: name.to_string(),
        })
}

/// Keep only the Applications belonging to one of `projects`.
///
/// An empty list of projects keeps everything.
pub fn filter_by_projects(apps: Vec<Application>, projects: &[String]) -> Vec<Application> {
    if projects.is_empty() {
        return apps;
    }
    apps.into_iter()
        .filter(|app| {
            let project = app.spec.project_name();
            projects.iter().any(|p| p == project)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::api::ResourceExt;
    use kube::runtime::{reflector::store::Writer, watcher};
    use rstest::*;
    use serde_json::json;

    fn project(spec: serde_json::Value) -> AppProject {
        AppProject {
            metadata: ObjectMeta {
                name: Some("default".to_string()),
                namespace: Some("argocd".to_string()),
                ..Default::default()
            },
            spec: serde_json::from_value(spec).expect("cannot deserialize project spec"),
        }
    }

    fn store_with(projects: Vec<AppProject>) -> Store<AppProject> {
        let mut writer = Writer::<AppProject>::default();
        for project in projects {
            writer.apply_watcher_event(&watcher::Event::Applied(project));
        }
        writer.as_reader()
    }

    #[rstest]
    #[case(json!({"sourceRepos": ["*"]}), "https://github.com/argoproj/argo-cd", true)]
    #[case(
        json!({"sourceRepos": ["https://github.com/argoproj/argo-cd"]}),
        "https://github.com/argoproj/argo-cd",
        true,
    )]
    #[case(
        json!({"sourceRepos": ["https://github.com/argoproj/argo-cd"]}),
        "https://github.com/argoproj/other",
        false,
    )]
    #[case(json!({}), "https://github.com/argoproj/argo-cd", false)]
    fn test_is_source_permitted(
        #[case] spec: serde_json::Value,
        #[case] repo: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(project(spec).is_source_permitted(repo), expected);
    }

    #[rstest]
    #[case(json!([{"server": "*", "namespace": "*"}]), "https://a", "ns", true)]
    #[case(json!([{"server": "https://a", "namespace": "*"}]), "https://a", "ns", true)]
    #[case(json!([{"server": "https://a", "namespace": "*"}]), "https://b", "ns", false)]
    #[case(json!([{"server": "*", "namespace": "ns"}]), "https://b", "ns", true)]
    #[case(json!([{"server": "*", "namespace": "ns"}]), "https://b", "other", false)]
    #[case(
        json!([{"server": "https://a", "namespace": "x"}, {"server": "https://b", "namespace": "y"}]),
        "https://b",
        "y",
        true,
    )]
    #[case(
        json!([{"server": "https://a", "namespace": "x"}, {"server": "https://b", "namespace": "y"}]),
        "https://a",
        "y",
        false,
    )]
    #[case(json!([]), "https://a", "ns", false)]
    fn test_is_destination_permitted(
        #[case] destinations: serde_json::Value,
        #[case] server: &str,
        #[case] namespace: &str,
        #[case] expected: bool,
    ) {
        let project = project(json!({ "destinations": destinations }));
        assert_eq!(
            project.is_destination_permitted(&ApplicationDestination::new(server, namespace)),
            expected
        );
    }

    #[test]
    fn get_project_without_project_defined() {
        let store = store_with(vec![project(json!({}))]);
        let app = Application::new("test-app", ApplicationSpec::default());

        let project =
            get_app_project(&app.spec, &store, "argocd").expect("project should be found");
        assert_eq!(project.name_any(), "default");
    }

    #[test]
    fn get_project_from_another_namespace() {
        let store = store_with(vec![project(json!({}))]);
        let spec = ApplicationSpec::default();

        let result = get_app_project(&spec, &store, "other");
        assert!(matches!(result, Err(Error::NotFound { kind: "AppProject", .. })));
    }

    #[test]
    fn get_missing_project() {
        let store = store_with(vec![project(json!({}))]);
        let spec = ApplicationSpec {
            project: "team-a".to_string(),
            ..Default::default()
        };

        let error =
            get_app_project(&spec, &store, "argocd").expect_err("project should be missing");
        assert_eq!(error.to_string(), "AppProject 'team-a' not found");
    }

    #[rstest]
    #[case(vec![], vec!["a", "b", "c"])]
    #[case(vec!["default"], vec!["a"])]
    #[case(vec!["team-a", "team-b"], vec!["b", "c"])]
    #[case(vec!["unknown"], vec![])]
    fn test_filter_by_projects(#[case] projects: Vec<&str>, #[case] expected: Vec<&str>) {
        let apps = vec![("a", ""), ("b", "team-a"), ("c", "team-b")]
            .into_iter()
            .map(|(name, project)| {
                Application::new(
                    name,
                    ApplicationSpec {
                        project: project.to_string(),
                        ..Default::default()
                    },
                )
            })
            .collect();
        let projects: Vec<String> = projects.into_iter().map(String::from).collect();

        let names: Vec<String> = filter_by_projects(apps, &projects)
            .iter()
            .map(|app| app.name_any())
            .collect();
        assert_eq!(names, expected);
    }
}
