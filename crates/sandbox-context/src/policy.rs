//! Declarative sync policy for context bindings.
//!
//! Policies are immutable values validated at construction: a wildcard
//! in any path or an unknown enum token is rejected immediately and never
//! reaches the backend.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Characters that would make a path a pattern instead of a literal.
const WILDCARD_CHARS: [char; 4] = ['*', '?', '[', ']'];

/// Policy validation error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Wildcard patterns are not supported in {field}: {path:?} (use literal paths)")]
    WildcardPath { field: &'static str, path: String },
    #[error("Unknown lifecycle: {0}")]
    UnknownLifecycle(String),
    #[error("Unknown upload mode: {0}")]
    UnknownUploadMode(String),
    #[error("Unknown sync mode: {0}")]
    UnknownSyncMode(String),
    #[error("Mount path must be absolute: {0:?}")]
    RelativeMountPath(String),
    #[error("Context id must not be empty")]
    EmptyContextId,
}

fn ensure_literal(field: &'static str, path: &str) -> Result<(), PolicyError> {
    if path.contains(WILDCARD_CHARS) {
        return Err(PolicyError::WildcardPath {
            field,
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Normalize separators: backslashes become slashes, runs of slashes
/// collapse, and a trailing slash is dropped (except for the root).
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.trim().chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Component-wise prefix test on normalized paths. An empty prefix
/// matches everything.
pub(crate) fn has_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// How the mount path is shipped to context storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UploadMode {
    /// One compressed artifact per sync.
    Archive,
    /// Files transferred one at a time.
    #[default]
    File,
}

impl UploadMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "Archive",
            Self::File => "File",
        }
    }
}

impl FromStr for UploadMode {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Archive" | "ARCHIVE" | "archive" => Ok(Self::Archive),
            "File" | "FILE" | "file" | "INDIVIDUAL_FILE" => Ok(Self::File),
            other => Err(PolicyError::UnknownUploadMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UploadStrategy {
    #[default]
    UploadBeforeResourceRelease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownloadStrategy {
    #[default]
    DownloadAsync,
}

/// Upload behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPolicy {
    pub auto_upload: bool,
    pub upload_strategy: UploadStrategy,
    pub upload_mode: UploadMode,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            auto_upload: true,
            upload_strategy: UploadStrategy::default(),
            upload_mode: UploadMode::default(),
        }
    }
}

/// Download behavior on session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadPolicy {
    pub auto_download: bool,
    pub download_strategy: DownloadStrategy,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            auto_download: true,
            download_strategy: DownloadStrategy::default(),
        }
    }
}

/// Whether local deletions propagate to context storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePolicy {
    pub sync_local_file: bool,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            sync_local_file: true,
        }
    }
}

/// Archive extraction on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractPolicy {
    pub extract: bool,
    pub delete_src_file: bool,
    pub extract_current_folder: bool,
}

impl Default for ExtractPolicy {
    fn default() -> Self {
        Self {
            extract: true,
            delete_src_file: true,
            extract_current_folder: false,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWhiteList {
    #[serde(default)]
    path: String,
    #[serde(default)]
    exclude_paths: Vec<String>,
}

/// One allow-list entry with its own deny list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawWhiteList")]
pub struct WhiteList {
    path: String,
    exclude_paths: Vec<String>,
}

impl WhiteList {
    /// Build an entry.
    ///
    /// # Errors
    /// Returns error if the path or any exclude path contains a wildcard.
    pub fn new<I>(path: impl Into<String>, exclude_paths: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let path = path.into();
        ensure_literal("white list path", &path)?;
        let exclude_paths: Vec<String> = exclude_paths.into_iter().map(Into::into).collect();
        for p in &exclude_paths {
            ensure_literal("exclude path", p)?;
        }
        Ok(Self {
            path,
            exclude_paths,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn exclude_paths(&self) -> &[String] {
        &self.exclude_paths
    }

    /// Whether `path` (already normalized) falls under this entry.
    fn includes(&self, path: &str) -> bool {
        if !has_prefix(path, &normalize_path(&self.path)) {
            return false;
        }
        !self
            .exclude_paths
            .iter()
            .map(|e| normalize_path(e))
            .filter(|e| !e.is_empty())
            .any(|e| has_prefix(path, &e))
    }
}

impl TryFrom<RawWhiteList> for WhiteList {
    type Error = PolicyError;

    fn try_from(raw: RawWhiteList) -> Result<Self, Self::Error> {
        Self::new(raw.path, raw.exclude_paths)
    }
}

/// Ordered allow/deny list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BWList {
    pub white_lists: Vec<WhiteList>,
}

impl Default for BWList {
    fn default() -> Self {
        Self {
            white_lists: vec![WhiteList {
                path: String::new(),
                exclude_paths: Vec::new(),
            }],
        }
    }
}

impl BWList {
    #[must_use]
    pub const fn new(white_lists: Vec<WhiteList>) -> Self {
        Self { white_lists }
    }

    /// True iff some entry's path is a prefix of `path` and none of that
    /// entry's exclude paths is.
    #[must_use]
    pub fn is_included(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.white_lists.iter().any(|w| w.includes(&path))
    }
}

/// Backend-side retention of synced data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifecycle {
    OneDay,
    ThreeDays,
    FiveDays,
    TenDays,
    ThirtyDays,
    #[default]
    Forever,
}

impl Lifecycle {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "Lifecycle_1Day",
            Self::ThreeDays => "Lifecycle_3Days",
            Self::FiveDays => "Lifecycle_5Days",
            Self::TenDays => "Lifecycle_10Days",
            Self::ThirtyDays => "Lifecycle_30Days",
            Self::Forever => "Lifecycle_Forever",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Lifecycle_1Day" => Ok(Self::OneDay),
            "Lifecycle_3Days" => Ok(Self::ThreeDays),
            "Lifecycle_5Days" => Ok(Self::FiveDays),
            "Lifecycle_10Days" => Ok(Self::TenDays),
            "Lifecycle_30Days" => Ok(Self::ThirtyDays),
            "Lifecycle_Forever" => Ok(Self::Forever),
            other => Err(PolicyError::UnknownLifecycle(other.to_string())),
        }
    }
}

impl Serialize for Lifecycle {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Lifecycle {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Deserialize)]
struct RawRecyclePolicy {
    #[serde(default)]
    lifecycle: Lifecycle,
    #[serde(default = "all_paths")]
    paths: Vec<String>,
}

fn all_paths() -> Vec<String> {
    vec![String::new()]
}

/// Expiration rule applied by the backend to paths in a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRecyclePolicy")]
pub struct RecyclePolicy {
    lifecycle: Lifecycle,
    paths: Vec<String>,
}

impl Default for RecyclePolicy {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Forever,
            paths: all_paths(),
        }
    }
}

impl RecyclePolicy {
    /// Build a recycle rule. An empty `paths` means "all".
    ///
    /// # Errors
    /// Returns error if any path contains a wildcard.
    pub fn new<I>(lifecycle: Lifecycle, paths: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        for p in &paths {
            ensure_literal("recycle path", p)?;
        }
        if paths.is_empty() {
            paths = all_paths();
        }
        Ok(Self { lifecycle, paths })
    }

    /// Build from a lifecycle token such as `"Lifecycle_3Days"`.
    ///
    /// # Errors
    /// Returns error on an unknown token or a wildcard path.
    pub fn from_token<I>(lifecycle: &str, paths: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::new(lifecycle.parse()?, paths)
    }

    #[must_use]
    pub const fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }
}

impl TryFrom<RawRecyclePolicy> for RecyclePolicy {
    type Error = PolicyError;

    fn try_from(raw: RawRecyclePolicy) -> Result<Self, Self::Error> {
        Self::new(raw.lifecycle, raw.paths)
    }
}

#[derive(Deserialize)]
struct RawMappingPolicy {
    #[serde(default)]
    path: String,
}

/// Alternate mount path used when the session runs on another platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMappingPolicy")]
pub struct MappingPolicy {
    path: String,
}

impl MappingPolicy {
    /// # Errors
    /// Returns error if the path contains a wildcard.
    pub fn new(path: impl Into<String>) -> Result<Self, PolicyError> {
        let path = path.into();
        ensure_literal("mapping path", &path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl TryFrom<RawMappingPolicy> for MappingPolicy {
    type Error = PolicyError;

    fn try_from(raw: RawMappingPolicy) -> Result<Self, Self::Error> {
        Self::new(raw.path)
    }
}

/// Complete sync policy for one binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncPolicy {
    pub upload_policy: UploadPolicy,
    pub download_policy: DownloadPolicy,
    pub delete_policy: DeletePolicy,
    pub extract_policy: ExtractPolicy,
    pub recycle_policy: RecyclePolicy,
    pub bw_list: BWList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_policy: Option<MappingPolicy>,
}

impl SyncPolicy {
    #[must_use]
    pub const fn upload_mode(&self) -> UploadMode {
        self.upload_policy.upload_mode
    }

    #[must_use]
    pub const fn with_upload_mode(mut self, mode: UploadMode) -> Self {
        self.upload_policy.upload_mode = mode;
        self
    }

    /// Whether the backend populates the mount when a session starts.
    #[must_use]
    pub fn with_auto_download(mut self, enabled: bool) -> Self {
        self.download_policy.auto_download = enabled;
        self
    }

    #[must_use]
    pub fn with_mapping_policy(mut self, mapping: MappingPolicy) -> Self {
        self.mapping_policy = Some(mapping);
        self
    }

    #[must_use]
    pub fn with_bw_list(mut self, bw_list: BWList) -> Self {
        self.bw_list = bw_list;
        self
    }

    #[must_use]
    pub fn with_recycle_policy(mut self, recycle_policy: RecyclePolicy) -> Self {
        self.recycle_policy = recycle_policy;
        self
    }

    /// Backend JSON encoding of this policy.
    ///
    /// # Errors
    /// Returns the serializer error; the policy is never sent half-encoded.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Whether `path` is synced under `policy`. Pure; no I/O.
#[must_use]
pub fn is_path_included(path: &str, policy: &SyncPolicy) -> bool {
    policy.bw_list.is_included(path)
}

/// Direction of a sync task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Upload,
    Download,
}

impl SyncMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            _ => Err(PolicyError::UnknownSyncMode(s.to_string())),
        }
    }
}

/// Binding of a context to a mount path inside a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSync {
    context_id: String,
    path: String,
    policy: Option<SyncPolicy>,
}

impl ContextSync {
    /// # Errors
    /// Returns error if the context id is empty or the mount path is
    /// relative or contains a wildcard.
    pub fn new(
        context_id: impl Into<String>,
        path: impl Into<String>,
        policy: Option<SyncPolicy>,
    ) -> Result<Self, PolicyError> {
        let context_id = context_id.into();
        if context_id.trim().is_empty() {
            return Err(PolicyError::EmptyContextId);
        }
        let path = path.into();
        ensure_literal("mount path", &path)?;
        let normalized = normalize_path(&path);
        if !normalized.starts_with('/') {
            return Err(PolicyError::RelativeMountPath(path));
        }
        Ok(Self {
            context_id,
            path: normalized,
            policy,
        })
    }

    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn policy(&self) -> Option<&SyncPolicy> {
        self.policy.as_ref()
    }

    /// Upload mode in effect, falling back to the policy default.
    #[must_use]
    pub fn upload_mode(&self) -> UploadMode {
        self.policy.as_ref().map_or_else(UploadMode::default, SyncPolicy::upload_mode)
    }

    /// `path` re-rooted at the mount path, e.g. `/tmp/data/a/b` under
    /// `/tmp/data` becomes `/a/b`. Paths outside the mount come back
    /// normalized but otherwise unchanged.
    #[must_use]
    pub fn relative(&self, path: &str) -> String {
        let path = normalize_path(path);
        if self.path == "/" {
            return path;
        }
        match path.strip_prefix(&self.path) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => path,
        }
    }

    /// Whether `path` lies under this binding's mount path.
    #[must_use]
    pub fn covers(&self, path: &str) -> bool {
        has_prefix(&normalize_path(path), &self.path)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_wildcards_rejected_everywhere() {
        for bad in ["/data/*", "/data/?.txt", "/data/[ab]", "/data/]"] {
            assert_err!(WhiteList::new(bad, Vec::<String>::new()));
            assert_err!(WhiteList::new("/data", [bad]));
            assert_err!(RecyclePolicy::new(Lifecycle::OneDay, [bad]));
            assert_err!(MappingPolicy::new(bad));
            assert_err!(ContextSync::new("ctx", bad, None));
        }
    }

    #[test]
    fn test_unknown_lifecycle_rejected() {
        let err = RecyclePolicy::from_token("Lifecycle_2Days", [""]).unwrap_err();
        assert_eq!(err, PolicyError::UnknownLifecycle("Lifecycle_2Days".into()));
        let ok = assert_ok!(RecyclePolicy::from_token("Lifecycle_30Days", ["/logs"]));
        assert_eq!(ok.lifecycle(), Lifecycle::ThirtyDays);
    }

    #[test]
    fn test_recycle_empty_paths_means_all() {
        let policy = assert_ok!(RecyclePolicy::new(Lifecycle::TenDays, Vec::<String>::new()));
        assert_eq!(policy.paths(), [String::new()]);
    }

    #[test]
    fn test_deserialize_validates() {
        let bad = r#"{"bwList":{"whiteLists":[{"path":"/data/*","excludePaths":[]}]}}"#;
        assert!(serde_json::from_str::<SyncPolicy>(bad).is_err());
        let bad = r#"{"recyclePolicy":{"lifecycle":"Lifecycle_7Days","paths":[""]}}"#;
        assert!(serde_json::from_str::<SyncPolicy>(bad).is_err());
    }

    #[test]
    fn test_policy_json_shape() {
        let policy = SyncPolicy::default().with_upload_mode(UploadMode::Archive);
        let json: serde_json::Value = serde_json::from_str(&assert_ok!(policy.to_json())).unwrap();
        assert_eq!(json["uploadPolicy"]["uploadMode"], "Archive");
        assert_eq!(
            json["uploadPolicy"]["uploadStrategy"],
            "UploadBeforeResourceRelease"
        );
        assert_eq!(json["downloadPolicy"]["downloadStrategy"], "DownloadAsync");
        assert_eq!(json["deletePolicy"]["syncLocalFile"], true);
        assert_eq!(json["recyclePolicy"]["lifecycle"], "Lifecycle_Forever");
        assert_eq!(json["recyclePolicy"]["paths"][0], "");
        assert_eq!(json["bwList"]["whiteLists"][0]["path"], "");
        assert!(json.get("mappingPolicy").is_none());

        let back: SyncPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_path_filter() {
        let bw = BWList::new(vec![
            assert_ok!(WhiteList::new("/data", ["/data/tmp", "/data/cache/"])),
            assert_ok!(WhiteList::new("/logs", Vec::<String>::new())),
        ]);
        let policy = SyncPolicy::default().with_bw_list(bw);

        assert!(is_path_included("/data", &policy));
        assert!(is_path_included("/data/a.txt", &policy));
        assert!(is_path_included("\\data\\sub\\b.txt", &policy));
        assert!(is_path_included("/logs//app.log", &policy));
        assert!(!is_path_included("/data/tmp", &policy));
        assert!(!is_path_included("/data/tmp/x", &policy));
        assert!(!is_path_included("/data/cache/y", &policy));
        assert!(is_path_included("/data/tmpfile", &policy));
        assert!(!is_path_included("/database", &policy));
        assert!(!is_path_included("/etc/passwd", &policy));
    }

    #[test]
    fn test_exclusion_is_scoped_to_its_entry() {
        let bw = BWList::new(vec![
            assert_ok!(WhiteList::new("/data", ["/data/tmp"])),
            assert_ok!(WhiteList::new("/data/tmp/keep", Vec::<String>::new())),
        ]);
        assert!(bw.is_included("/data/tmp/keep/file"));
        assert!(!bw.is_included("/data/tmp/drop"));
    }

    #[test]
    fn test_default_bw_list_includes_everything() {
        let policy = SyncPolicy::default();
        assert!(is_path_included("/anything/at/all", &policy));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("C:\\\\data\\x\\"), "C:/data/x");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("//tmp///data/"), "/tmp/data");
    }

    #[test]
    fn test_context_sync_binding() {
        let binding = assert_ok!(ContextSync::new("ctx-1", "/tmp/data/", None));
        assert_eq!(binding.path(), "/tmp/data");
        assert!(binding.covers("/tmp/data/file.bin"));
        assert!(!binding.covers("/tmp/database"));
        assert_eq!(binding.upload_mode(), UploadMode::File);
        assert_eq!(binding.relative("/tmp/data/a/b"), "/a/b");
        assert_eq!(binding.relative("/tmp/data"), "/");
        assert_eq!(binding.relative("/etc/x"), "/etc/x");
        assert_eq!(
            ContextSync::new("ctx-1", "tmp/data", None),
            Err(PolicyError::RelativeMountPath("tmp/data".into()))
        );
        assert_eq!(
            ContextSync::new(" ", "/tmp", None),
            Err(PolicyError::EmptyContextId)
        );
    }

    #[test]
    fn test_upload_and_sync_mode_tokens() {
        assert_eq!("INDIVIDUAL_FILE".parse::<UploadMode>(), Ok(UploadMode::File));
        assert_eq!("ARCHIVE".parse::<UploadMode>(), Ok(UploadMode::Archive));
        assert!("zip".parse::<UploadMode>().is_err());
        assert_eq!("Upload".parse::<SyncMode>(), Ok(SyncMode::Upload));
        assert!("mirror".parse::<SyncMode>().is_err());
    }
}
