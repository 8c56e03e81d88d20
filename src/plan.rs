//! Migration plans: the ordered list of units a run applies.
//!
//! Order is always the order the caller wrote down, either in a TOML
//! manifest or in [`BUILTIN_MIGRATIONS`]. Nothing here sorts.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// File name looked up inside the migrations directory and the config dir.
pub const MANIFEST_FILE: &str = "migrations.toml";

/// The backend's schema history, in application order.
pub const BUILTIN_MIGRATIONS: &[&str] = &[
    "001_create_tables",
    "002_create_warehouses",
    "003_add_inventory_levels",
    "004_create_receipts",
    "005_create_audit_logs",
    "006_add_superadmin",
    "007_add_product_barcodes",
    "008_create_orders",
];

/// A named batch of schema statements stored in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    pub identifier: String,
    pub source: PathBuf,
}

impl MigrationUnit {
    pub fn new(identifier: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            source: source.into(),
        }
    }

    /// Unit for a bare file path; the identifier is the file stem.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let source = path.into();
        let identifier = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.to_string_lossy().into_owned());
        Self { identifier, source }
    }

    /// Read the unit's SQL. `Ok(None)` when the file does not exist.
    pub async fn load_body(&self) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.source).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Where a plan came from, for progress output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOrigin {
    Manifest(PathBuf),
    Builtin,
}

/// An ordered, validated list of migration units.
#[derive(Debug, Clone)]
pub struct Plan {
    pub origin: PlanOrigin,
    pub directory: PathBuf,
    units: Vec<MigrationUnit>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    directory: Option<PathBuf>,
    #[serde(default, rename = "migration")]
    migrations: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestEntry {
    name: String,
    file: Option<PathBuf>,
}

impl Plan {
    /// The built-in history, resolved against `directory`.
    pub fn builtin(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        let units = BUILTIN_MIGRATIONS
            .iter()
            .map(|name| MigrationUnit::new(*name, directory.join(format!("{name}.sql"))))
            .collect();
        Self {
            origin: PlanOrigin::Builtin,
            directory,
            units,
        }
    }

    /// Parse a manifest file.
    ///
    /// `directory` in the manifest is relative to the manifest itself; when
    /// absent, `default_dir` is used.
    pub fn from_manifest(path: &Path, default_dir: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ManifestRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_manifest(&content, path, default_dir)
    }

    fn parse_manifest(content: &str, path: &Path, default_dir: &Path) -> Result<Self, ConfigError> {
        let manifest: Manifest =
            toml::from_str(content).map_err(|source| ConfigError::ManifestParse {
                path: path.to_path_buf(),
                source,
            })?;

        let directory = match manifest.directory {
            Some(dir) if dir.is_relative() => path
                .parent()
                .map(|p| p.join(&dir))
                .unwrap_or(dir),
            Some(dir) => dir,
            None => default_dir.to_path_buf(),
        };

        let units = manifest
            .migrations
            .into_iter()
            .map(|entry| {
                let file = entry
                    .file
                    .unwrap_or_else(|| PathBuf::from(format!("{}.sql", entry.name)));
                MigrationUnit::new(entry.name, directory.join(file))
            })
            .collect();

        Self::validated(PlanOrigin::Manifest(path.to_path_buf()), directory, units)
    }

    /// Locate the plan for a run.
    ///
    /// Priority: explicit manifest, `migrations.toml` in `directory`,
    /// `migrations.toml` in the platform config dir, built-in list.
    pub fn discover(directory: &Path, manifest: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = manifest {
            return Self::from_manifest(path, directory);
        }

        let local = directory.join(MANIFEST_FILE);
        if local.is_file() {
            return Self::from_manifest(&local, directory);
        }

        if let Some(global) = global_manifest_path()
            && global.is_file()
        {
            return Self::from_manifest(&global, directory);
        }

        Ok(Self::builtin(directory))
    }

    fn validated(
        origin: PlanOrigin,
        directory: PathBuf,
        units: Vec<MigrationUnit>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for (index, unit) in units.iter().enumerate() {
            if unit.identifier.trim().is_empty() {
                return Err(ConfigError::EmptyName { index: index + 1 });
            }
            if !seen.insert(unit.identifier.as_str()) {
                return Err(ConfigError::DuplicateName(unit.identifier.clone()));
            }
        }
        Ok(Self {
            origin,
            directory,
            units,
        })
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Resolve the argument of a single-migration invocation.
    ///
    /// A plan identifier or a plan entry's file name selects that entry.
    /// Anything else is a path: tried as given, then inside the plan's
    /// directory. An unresolvable path is returned as given so the run
    /// reports it as a missing file.
    pub fn resolve(&self, arg: &str) -> MigrationUnit {
        let by_plan = self.units.iter().find(|u| {
            u.identifier == arg || u.source.file_name().is_some_and(|f| f == arg)
        });
        if let Some(unit) = by_plan {
            return unit.clone();
        }

        let path = PathBuf::from(arg);
        if path.is_relative() && !path.exists() {
            let in_dir = self.directory.join(&path);
            if in_dir.exists() {
                return MigrationUnit::from_path(in_dir);
            }
        }
        MigrationUnit::from_path(path)
    }
}

fn global_manifest_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(env!("CARGO_PKG_NAME")).join(MANIFEST_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(plan: &Plan) -> Vec<&str> {
        plan.units().iter().map(|u| u.identifier.as_str()).collect()
    }

    #[test]
    fn test_builtin_plan_keeps_declared_order() {
        let plan = Plan::builtin("db/migrations");
        assert_eq!(ids(&plan), BUILTIN_MIGRATIONS.to_vec());
        assert_eq!(
            plan.units()[0].source,
            PathBuf::from("db/migrations/001_create_tables.sql")
        );
        assert_eq!(plan.origin, PlanOrigin::Builtin);
    }

    #[test]
    fn test_manifest_order_is_not_sorted() {
        let toml = r#"
            directory = "sql"

            [[migration]]
            name = "010_late"

            [[migration]]
            name = "002_early"
            file = "custom/early.sql"
        "#;
        let plan =
            Plan::parse_manifest(toml, Path::new("/srv/app/migrations.toml"), Path::new("x"))
                .unwrap();
        assert_eq!(ids(&plan), vec!["010_late", "002_early"]);
        assert_eq!(plan.units()[0].source, PathBuf::from("/srv/app/sql/010_late.sql"));
        assert_eq!(
            plan.units()[1].source,
            PathBuf::from("/srv/app/sql/custom/early.sql")
        );
    }

    #[test]
    fn test_manifest_without_directory_uses_default() {
        let toml = "[[migration]]\nname = \"001_a\"\n";
        let plan = Plan::parse_manifest(toml, Path::new("m.toml"), Path::new("migrations")).unwrap();
        assert_eq!(plan.units()[0].source, PathBuf::from("migrations/001_a.sql"));
    }

    #[test]
    fn test_manifest_rejects_duplicates() {
        let toml = "[[migration]]\nname = \"a\"\n[[migration]]\nname = \"a\"\n";
        let err = Plan::parse_manifest(toml, Path::new("m.toml"), Path::new(".")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn test_manifest_rejects_empty_name() {
        let toml = "[[migration]]\nname = \"a\"\n[[migration]]\nname = \" \"\n";
        let err = Plan::parse_manifest(toml, Path::new("m.toml"), Path::new(".")).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyName { index: 2 }));
    }

    #[test]
    fn test_manifest_rejects_unknown_keys() {
        let toml = "[[migration]]\nname = \"a\"\norder = 3\n";
        let err = Plan::parse_manifest(toml, Path::new("m.toml"), Path::new(".")).unwrap_err();
        assert!(matches!(err, ConfigError::ManifestParse { .. }));
    }

    #[test]
    fn test_discover_prefers_local_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "[[migration]]\nname = \"only_one\"\n",
        )
        .unwrap();
        let plan = Plan::discover(dir.path(), None).unwrap();
        assert_eq!(ids(&plan), vec!["only_one"]);
        assert!(matches!(plan.origin, PlanOrigin::Manifest(_)));
    }

    #[test]
    fn test_discover_missing_explicit_manifest_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = Plan::discover(dir.path(), Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ManifestRead { .. }));
    }

    #[test]
    fn test_resolve_by_identifier_and_file_name() {
        let plan = Plan::builtin("migrations");
        let a = plan.resolve("004_create_receipts");
        let b = plan.resolve("004_create_receipts.sql");
        assert_eq!(a, b);
        assert_eq!(a.source, PathBuf::from("migrations/004_create_receipts.sql"));
    }

    #[test]
    fn test_resolve_path_inside_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("042_hotfix.sql"), "SELECT 1;").unwrap();
        let plan = Plan::builtin(dir.path());
        let unit = plan.resolve("042_hotfix.sql");
        assert_eq!(unit.identifier, "042_hotfix");
        assert_eq!(unit.source, dir.path().join("042_hotfix.sql"));
    }

    #[test]
    fn test_resolve_unknown_path_kept_as_given() {
        let plan = Plan::builtin("migrations");
        let unit = plan.resolve("does/not/exist.sql");
        assert_eq!(unit.identifier, "exist");
        assert_eq!(unit.source, PathBuf::from("does/not/exist.sql"));
    }

    #[tokio::test]
    async fn test_load_body_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let unit = MigrationUnit::new("x", dir.path().join("x.sql"));
        assert!(unit.load_body().await.unwrap().is_none());

        std::fs::write(&unit.source, "CREATE TABLE x (id INT);").unwrap();
        assert_eq!(
            unit.load_body().await.unwrap().as_deref(),
            Some("CREATE TABLE x (id INT);")
        );
    }
}
