//! What gets installed, and in which order
use anyhow::{Context, Result};
use minijinja::{context, Environment};
use razeedeploy_core::{
    source::parse_documents, ApplyPolicy, Entry, ReleaseRef, TypeRef, Version,
};
use serde_json::{json, Value};
use tracing::warn;

/// Namespace, service account, rbac and config for razeedeploy
const PREREQS_TEMPLATE: &str = include_str!("../resources/preReqs.yaml");

/// RemoteResource keeping installed components on their latest release
const AUTO_UPDATE_TEMPLATE: &str = include_str!("../resources/autoUpdateRR.yaml");

/// A razeedeploy component published as a github release asset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Component {
    /// Name used on the command line and in the auto-update requests
    pub name: &'static str,
    /// Repository under the release base url
    pub repo: &'static str,
}

/// Every installable component, in install order
pub const COMPONENTS: [Component; 7] = [
    Component { name: "watch-keeper", repo: "watch-keeper" },
    Component { name: "remoteresource", repo: "RemoteResource" },
    Component { name: "remoteresources3", repo: "RemoteResourceS3" },
    Component { name: "remoteresources3decrypt", repo: "RemoteResourceS3Decrypt" },
    Component { name: "mustachetemplate", repo: "MustacheTemplate" },
    Component { name: "featureflagsetld", repo: "FeatureFlagSetLD" },
    Component { name: "managedset", repo: "ManagedSet" },
];

/// The component providing the RemoteResource CRD used for auto-update
const REMOTE_RESOURCE: &str = "remoteresource";

/// Everything the plan depends on
#[derive(Clone, Debug)]
pub struct InstallOptions {
    /// Namespace the prerequisites and auto-update resource are rendered into
    pub namespace: String,
    /// Explicitly requested components; empty means all of them at latest
    pub requested: Vec<(&'static str, Version)>,
    /// Append the auto-update RemoteResource
    pub auto_update: bool,
    /// Apply policy for every entry
    pub policy: ApplyPolicy,
    /// Base url of the release repositories, e.g. `https://github.com/razee-io`
    pub release_base_url: String,
}

impl InstallOptions {
    fn release(&self, component: &Component, version: Version) -> ReleaseRef {
        let template = format!(
            "{}/{}/releases/{}/resource.yaml",
            self.release_base_url.trim_end_matches('/'),
            component.repo,
            razeedeploy_core::source::VERSION_PLACEHOLDER
        );
        ReleaseRef::new(component.name, template, version)
    }

    /// Components to install with their versions, in install order
    fn selected(&self) -> Vec<ReleaseRef> {
        COMPONENTS
            .iter()
            .filter_map(|c| {
                if self.requested.is_empty() {
                    return Some(self.release(c, Version::Latest));
                }
                self.requested
                    .iter()
                    .find(|(name, _)| *name == c.name)
                    .map(|(_, version)| self.release(c, version.clone()))
            })
            .collect()
    }
}

fn render(template: &str, namespace: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("manifest", template)
        .context("invalid manifest template")?;
    env.get_template("manifest")
        .context("manifest template not found")?
        .render(context! { desired_namespace => namespace })
        .context("failed to render manifest template")
}

fn auto_update_resource(namespace: &str, releases: &[ReleaseRef]) -> Result<Value> {
    let rendered = render(AUTO_UPDATE_TEMPLATE, namespace)?;
    let mut rr: Value = serde_yaml::from_str(&rendered).context("invalid auto-update template")?;
    let requests = releases
        .iter()
        .map(|r| json!({ "options": { "url": r.latest_uri() } }))
        .collect();
    rr.as_object_mut()
        .context("auto-update template is not an object")?
        .entry("spec")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .context("auto-update spec is not an object")?
        .insert("requests".into(), Value::Array(requests));
    Ok(rr)
}

/// Build the ordered entries for a run
///
/// Prerequisites come first, then each selected component, then the
/// optional auto-update RemoteResource gated on its CRD being served.
pub fn build_plan(opts: &InstallOptions) -> Result<Vec<Entry>> {
    let prereqs = parse_documents(&render(PREREQS_TEMPLATE, &opts.namespace)?)
        .context("invalid prerequisites template")?;
    let mut entries = vec![Entry::parsed("Prerequisites", prereqs, opts.policy)];

    let releases = opts.selected();
    for release in &releases {
        let label = format!("{}:{}", release.name, release.version);
        entries.push(Entry::release(label, release.clone(), opts.policy));
    }

    if opts.auto_update {
        if releases.iter().any(|r| r.name == REMOTE_RESOURCE) {
            let rr = auto_update_resource(&opts.namespace, &releases)?;
            let entry = Entry::parsed("Auto-Update RemoteResource", rr, opts.policy)
                .requires_type(TypeRef::new("deploy.razee.io/v1alpha2", "RemoteResource"));
            entries.push(entry);
        } else {
            warn!("RemoteResource CRD must be one of the installed resources in order to use autoUpdate (eg. --rr).. Skipping autoUpdate");
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use razeedeploy_core::{decompose, EntrySource};

    fn options(requested: Vec<(&'static str, Version)>, auto_update: bool) -> InstallOptions {
        InstallOptions {
            namespace: "razee".into(),
            requested,
            auto_update,
            policy: ApplyPolicy::Replace,
            release_base_url: "https://github.com/razee-io/".into(),
        }
    }

    fn release_names(entries: &[Entry]) -> Vec<String> {
        entries
            .iter()
            .filter_map(|e| match &e.source {
                EntrySource::Release(r) => Some(r.name.clone()),
                EntrySource::Parsed(_) => None,
            })
            .collect()
    }

    #[test]
    fn installs_everything_by_default() {
        let entries = build_plan(&options(vec![], false)).unwrap();
        assert_eq!(entries[0].label, "Prerequisites");
        assert_eq!(
            release_names(&entries),
            COMPONENTS.iter().map(|c| c.name.to_string()).collect::<Vec<_>>()
        );
        assert_eq!(entries.len(), 1 + COMPONENTS.len());
    }

    #[test]
    fn prerequisites_are_rendered_into_the_namespace() {
        let entries = build_plan(&options(vec![], false)).unwrap();
        let EntrySource::Parsed(prereqs) = entries[0].source.clone() else {
            panic!("prerequisites should be parsed inline");
        };
        let docs: Vec<_> = decompose(prereqs).collect();
        assert_eq!(docs[0].kind(), Some("Namespace"));
        assert_eq!(docs[0].name(), Some("razee"));
        assert!(docs
            .iter()
            .filter(|d| d.kind() == Some("ServiceAccount") || d.kind() == Some("ConfigMap"))
            .all(|d| d.namespace() == Some("razee")));
    }

    #[test]
    fn only_requested_components_at_their_versions() {
        let requested = vec![
            ("managedset", Version::Tag("0.4.1".into())),
            ("watch-keeper", Version::Latest),
        ];
        let entries = build_plan(&options(requested, false)).unwrap();
        assert_eq!(release_names(&entries), vec!["watch-keeper", "managedset"]);
        let EntrySource::Release(ms) = &entries[2].source else {
            panic!("expected a release entry");
        };
        assert_eq!(
            ms.uri(),
            "https://github.com/razee-io/ManagedSet/releases/download/0.4.1/resource.yaml"
        );
        assert_eq!(entries[2].label, "managedset:0.4.1");
    }

    #[test]
    fn auto_update_tracks_latest_of_installed_components() {
        let requested = vec![
            ("remoteresource", Version::Tag("0.6.0".into())),
            ("mustachetemplate", Version::Latest),
        ];
        let entries = build_plan(&options(requested, true)).unwrap();
        let auto = entries.last().unwrap();
        assert_eq!(
            auto.requires_type,
            Some(TypeRef::new("deploy.razee.io/v1alpha2", "RemoteResource"))
        );
        let EntrySource::Parsed(source) = auto.source.clone() else {
            panic!("auto-update should be parsed inline");
        };
        let rr = decompose(source).next().unwrap();
        assert_eq!(rr.namespace(), Some("razee"));
        assert_eq!(
            rr.as_object()["spec"]["requests"],
            json!([
                {"options": {"url": "https://github.com/razee-io/RemoteResource/releases/latest/download/resource.yaml"}},
                {"options": {"url": "https://github.com/razee-io/MustacheTemplate/releases/latest/download/resource.yaml"}},
            ])
        );
    }

    #[test]
    fn auto_update_needs_remoteresource() {
        let requested = vec![("managedset", Version::Latest)];
        let entries = build_plan(&options(requested, true)).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.requires_type.is_none()));
    }
}
