//! Manifests embedded into the cluster-manager controllers

use ocm_reconcile::manifest::ManifestTemplates;

/// StorageVersionMigration requests applied once the hub is up
pub const MIGRATION_ARTIFACTS: &[&str] = &[
    "cluster-manager/managedclustersets-migration.yaml",
    "cluster-manager/managedclustersetbindings-migration.yaml",
];

const SOURCES: &[(&str, &str)] = &[
    (
        "cluster-manager/managedclustersets-migration.yaml",
        include_str!("../manifests/cluster-manager/managedclustersets-migration.yaml"),
    ),
    (
        "cluster-manager/managedclustersetbindings-migration.yaml",
        include_str!("../manifests/cluster-manager/managedclustersetbindings-migration.yaml"),
    ),
];

/// Compile the embedded cluster-manager manifests
pub fn templates() -> ocm_reconcile::Result<ManifestTemplates> {
    ManifestTemplates::new(SOURCES)
}
