//! Image resolution for the worker and init-users containers
//!
//! Each field is resolved by an ordered [`Chain`] of sources. The first source
//! that yields a non-empty value wins; the last step is always a built-in
//! default.

use k8s_openapi::api::core::v1::ConfigMap;
use serde::Deserialize;
use tracing::debug;

use databackup_common::crd::InitUsersSpec;
use databackup_common::Error;

/// Built-in image for the init-users container
pub const DEFAULT_INIT_IMAGE: &str = "registry.aliyuncs.com/fluid/init-users:v0.3.0-1467caa";

/// Pull policy used when the runtime does not set one
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// Key of the runtime values ConfigMap holding the values document
const VALUES_KEY: &str = "data";

/// A value together with the source that produced it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved<T> {
    /// Name of the winning step
    pub source: &'static str,
    /// The resolved value
    pub value: T,
}

/// Ordered precedence chain; earlier steps win
#[derive(Debug)]
pub struct Chain<T> {
    steps: Vec<(&'static str, Option<T>)>,
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<T> Chain<T> {
    /// Start an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step that may or may not produce a value
    pub fn step(mut self, source: &'static str, value: Option<T>) -> Self {
        self.steps.push((source, value));
        self
    }

    /// First step with a value
    pub fn resolve(self) -> Option<Resolved<T>> {
        self.steps
            .into_iter()
            .find_map(|(source, value)| value.map(|value| Resolved { source, value }))
    }

    /// First step with a value, or the fallible final default
    pub fn or_try<E>(
        self,
        source: &'static str,
        default: impl FnOnce() -> Result<T, E>,
    ) -> Result<Resolved<T>, E> {
        match self.resolve() {
            Some(resolved) => Ok(resolved),
            None => Ok(Resolved {
                source,
                value: default()?,
            }),
        }
    }
}

/// Resolved image reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    /// Repository, e.g. `registry.example.com/alluxio/alluxio`
    pub repository: String,
    /// Tag, e.g. `2.3.0`
    pub tag: String,
}

impl std::fmt::Display for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Split `repo[:port]/path:tag` into repository and tag
///
/// The tag is what follows the last `:` as long as it contains no `/`
/// (otherwise the colon belongs to a registry port).
pub fn parse_image_ref(reference: &str) -> Option<(String, String)> {
    let (repo, tag) = reference.trim().rsplit_once(':')?;
    if repo.is_empty() || tag.is_empty() || tag.contains('/') {
        return None;
    }
    Some((repo.to_string(), tag.to_string()))
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_default(default: &str) -> Result<(String, String), Error> {
    parse_image_ref(default).ok_or_else(|| {
        Error::image_config(format!("default image '{}' is not in repo:tag form", default))
    })
}

/// Image fields of the values document a runtime was installed with
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValuesImage {
    /// Repository the runtime workers run
    #[serde(default)]
    pub image: String,
    /// Tag the runtime workers run
    #[serde(default)]
    pub image_tag: String,
}

impl ValuesImage {
    /// Read the image from a runtime values ConfigMap
    ///
    /// A missing key or unparseable document yields `None`; the caller falls
    /// back to overrides and defaults.
    pub fn from_config_map(cm: &ConfigMap) -> Option<Self> {
        let data = cm.data.as_ref()?.get(VALUES_KEY)?;
        match serde_yaml::from_str(data) {
            Ok(values) => Some(values),
            Err(e) => {
                debug!(error = %e, "ignoring unparseable runtime values");
                None
            }
        }
    }
}

/// Worker image: runtime values, then env override, then built-in default
pub fn resolve_worker_image(
    values: Option<&ValuesImage>,
    env_override: Option<&str>,
    default: &str,
) -> Result<Image, Error> {
    let (env_repo, env_tag) = env_override.and_then(parse_image_ref).unzip();

    let repository = Chain::new()
        .step("runtime values", values.and_then(|v| non_empty(&v.image)))
        .step("env override", env_repo)
        .or_try("default", || parse_default(default).map(|(repo, _)| repo))?;
    let tag = Chain::new()
        .step("runtime values", values.and_then(|v| non_empty(&v.image_tag)))
        .step("env override", env_tag)
        .or_try("default", || parse_default(default).map(|(_, tag)| tag))?;

    debug!(
        repository = %repository.value,
        repository_source = repository.source,
        tag = %tag.value,
        tag_source = tag.source,
        "resolved worker image"
    );
    Ok(Image {
        repository: repository.value,
        tag: tag.value,
    })
}

/// Init-users image and pull policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitImage {
    /// Image reference
    pub image: Image,
    /// Pull policy
    pub pull_policy: String,
}

/// Init-users image: runtime spec, then env override, then built-in default
pub fn resolve_init_image(
    runtime: Option<&InitUsersSpec>,
    env_override: Option<&str>,
    default: &str,
) -> Result<InitImage, Error> {
    let (env_repo, env_tag) = env_override.and_then(parse_image_ref).unzip();

    let repository = Chain::new()
        .step("runtime spec", runtime.and_then(|r| non_empty(&r.image)))
        .step("env override", env_repo)
        .or_try("default", || parse_default(default).map(|(repo, _)| repo))?;
    let tag = Chain::new()
        .step("runtime spec", runtime.and_then(|r| non_empty(&r.image_tag)))
        .step("env override", env_tag)
        .or_try("default", || parse_default(default).map(|(_, tag)| tag))?;
    let pull_policy = Chain::new()
        .step("runtime spec", runtime.and_then(|r| non_empty(&r.image_pull_policy)))
        .or_try("default", || Ok::<_, Error>(DEFAULT_PULL_POLICY.to_string()))?;

    Ok(InitImage {
        image: Image {
            repository: repository.value,
            tag: tag.value,
        },
        pull_policy: pull_policy.value,
    })
}
