//! # Kind module
//!
//! This module provides the kubedb resource kinds supported by the command
//! line interface and resolves the many names a user may give them.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use kube::api::ApiResource;

// -----------------------------------------------------------------------------
// Constants

pub const GROUP: &str = "kubedb.com";
pub const VERSION: &str = "v1";
pub const OPS_GROUP: &str = "ops.kubedb.com";
pub const OPS_VERSION: &str = "v1alpha1";
pub const CATALOG_GROUP: &str = "catalog.kubedb.com";
pub const CATALOG_VERSION: &str = "v1alpha1";
pub const ARCHIVER_GROUP: &str = "archiver.kubedb.com";
pub const ARCHIVER_VERSION: &str = "v1alpha1";
pub const AUTOSCALER_GROUP: &str = "autoscaling.kubedb.com";
pub const AUTOSCALER_VERSION: &str = "v1alpha1";
pub const PETSET_GROUP: &str = "apps.k8s.appscode.com";
pub const PETSET_VERSION: &str = "v1";
pub const APP_BINDING_GROUP: &str = "appcatalog.appscode.com";
pub const APP_BINDING_VERSION: &str = "v1alpha1";
pub const CERTIFICATE_GROUP: &str = "cert-manager.io";
pub const CERTIFICATE_VERSION: &str = "v1";
pub const MSSQL_VERSION: &str = "v1alpha2";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug)]
pub enum Error {
    #[error("kubedb doesn't support a resource type \"{0}\"")]
    Unsupported(String),
}

// -----------------------------------------------------------------------------
// ResourceKind enumeration

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum ResourceKind {
    Elasticsearch,
    Postgres,
    MySql,
    MongoDb,
    Redis,
    MariaDb,
}

impl ResourceKind {
    pub const ALL: [Self; 6] = [
        Self::Elasticsearch,
        Self::Postgres,
        Self::MySql,
        Self::MongoDb,
        Self::Redis,
        Self::MariaDb,
    ];

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Elasticsearch => "Elasticsearch",
            Self::Postgres => "Postgres",
            Self::MySql => "MySQL",
            Self::MongoDb => "MongoDB",
            Self::Redis => "Redis",
            Self::MariaDb => "MariaDB",
        }
    }

    pub const fn plural(&self) -> &'static str {
        match self {
            Self::Elasticsearch => "elasticsearches",
            Self::Postgres => "postgreses",
            Self::MySql => "mysqls",
            Self::MongoDb => "mongodbs",
            Self::Redis => "redises",
            Self::MariaDb => "mariadbs",
        }
    }

    pub const fn singular(&self) -> &'static str {
        match self {
            Self::Elasticsearch => "elasticsearch",
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::MongoDb => "mongodb",
            Self::Redis => "redis",
            Self::MariaDb => "mariadb",
        }
    }

    pub const fn short(&self) -> &'static str {
        match self {
            Self::Elasticsearch => "es",
            Self::Postgres => "pg",
            Self::MySql => "my",
            Self::MongoDb => "mg",
            Self::Redis => "rd",
            Self::MariaDb => "md",
        }
    }

    /// returns the port on which the database service listens for clients
    pub const fn database_port(&self) -> u16 {
        match self {
            Self::Elasticsearch => 9200,
            Self::Postgres => 5432,
            Self::MySql | Self::MariaDb => 3306,
            Self::MongoDb => 27017,
            Self::Redis => 6379,
        }
    }

    /// returns if the kind has a point-in-time archiver
    pub const fn archivable(&self) -> bool {
        matches!(
            self,
            Self::Postgres | Self::MySql | Self::MongoDb | Self::MariaDb
        )
    }

    /// returns the fully qualified resource name, e.g. `postgreses.kubedb.com`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.plural(), GROUP)
    }

    /// resolves a kind from the `kind` field of a manifest
    pub fn from_kind(kind: &str) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|k| k.kind() == kind)
            .ok_or_else(|| Error::Unsupported(kind.to_string()))
    }

    pub fn api_resource(&self) -> ApiResource {
        self.versioned_resource(VERSION)
    }

    /// returns the resource served at another version of the group, e.g.
    /// `v1alpha2` for older manifests
    pub fn versioned_resource(&self, version: &str) -> ApiResource {
        api_resource(GROUP, version, self.kind(), self.plural())
    }

    pub fn ops_request_resource(&self) -> ApiResource {
        let kind = format!("{}OpsRequest", self.kind());
        let plural = format!("{}opsrequests", self.kind().to_lowercase());

        api_resource(OPS_GROUP, OPS_VERSION, &kind, &plural)
    }

    pub fn version_resource(&self) -> ApiResource {
        let kind = format!("{}Version", self.kind());
        let plural = format!("{}versions", self.kind().to_lowercase());

        api_resource(CATALOG_GROUP, CATALOG_VERSION, &kind, &plural)
    }

    pub fn autoscaler_resource(&self) -> ApiResource {
        let kind = format!("{}Autoscaler", self.kind());
        let plural = format!("{}autoscalers", self.kind().to_lowercase());

        api_resource(AUTOSCALER_GROUP, AUTOSCALER_VERSION, &kind, &plural)
    }

    pub fn archiver_resource(&self) -> Option<ApiResource> {
        if !self.archivable() {
            return None;
        }

        let kind = format!("{}Archiver", self.kind());
        let plural = format!("{}archivers", self.kind().to_lowercase());

        Some(api_resource(ARCHIVER_GROUP, ARCHIVER_VERSION, &kind, &plural))
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.to_lowercase();
        let name = name
            .strip_suffix(&format!(".{}", GROUP))
            .unwrap_or(&name);

        Self::ALL
            .into_iter()
            .find(|k| {
                k.kind().to_lowercase() == name
                    || k.plural() == name
                    || k.singular() == name
                    || k.short() == name
            })
            .ok_or_else(|| Error::Unsupported(s.to_string()))
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

// -----------------------------------------------------------------------------
// helpers

/// returns the resource of the petsets running the database pods
pub fn petset_resource() -> ApiResource {
    api_resource(PETSET_GROUP, PETSET_VERSION, "PetSet", "petsets")
}

pub fn app_binding_resource() -> ApiResource {
    api_resource(APP_BINDING_GROUP, APP_BINDING_VERSION, "AppBinding", "appbindings")
}

/// returns the resource of cert-manager certificates
pub fn certificate_resource() -> ApiResource {
    api_resource(CERTIFICATE_GROUP, CERTIFICATE_VERSION, "Certificate", "certificates")
}

/// returns the resource of mssql servers, only served by kubedb at
/// `v1alpha2`
pub fn mssql_resource() -> ApiResource {
    api_resource(GROUP, MSSQL_VERSION, "MSSQLServer", "mssqlservers")
}

fn api_resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: format!("{}/{}", group, version),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_alias() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.kind().parse::<ResourceKind>(), Ok(kind));
            assert_eq!(kind.plural().parse::<ResourceKind>(), Ok(kind));
            assert_eq!(kind.singular().parse::<ResourceKind>(), Ok(kind));
            assert_eq!(kind.short().parse::<ResourceKind>(), Ok(kind));
            assert_eq!(kind.qualified().parse::<ResourceKind>(), Ok(kind));
        }
    }

    #[test]
    fn resolution_ignores_case() {
        assert_eq!("PG".parse::<ResourceKind>(), Ok(ResourceKind::Postgres));
        assert_eq!("MySQL".parse::<ResourceKind>(), Ok(ResourceKind::MySql));
        assert_eq!(
            "Elasticsearches".parse::<ResourceKind>(),
            Ok(ResourceKind::Elasticsearch)
        );
    }

    #[test]
    fn rejects_unknown_resource() {
        let err = "snapshot".parse::<ResourceKind>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "kubedb doesn't support a resource type \"snapshot\""
        );
    }

    #[test]
    fn derives_ops_request_and_catalog_resources() {
        let ops = ResourceKind::MongoDb.ops_request_resource();
        assert_eq!(ops.api_version, "ops.kubedb.com/v1alpha1");
        assert_eq!(ops.kind, "MongoDBOpsRequest");
        assert_eq!(ops.plural, "mongodbopsrequests");

        let version = ResourceKind::Postgres.version_resource();
        assert_eq!(version.kind, "PostgresVersion");
        assert_eq!(version.plural, "postgresversions");

        let scaler = ResourceKind::MySql.autoscaler_resource();
        assert_eq!(scaler.api_version, "autoscaling.kubedb.com/v1alpha1");
        assert_eq!(scaler.kind, "MySQLAutoscaler");
        assert_eq!(scaler.plural, "mysqlautoscalers");

        let old = ResourceKind::Redis.versioned_resource("v1alpha2");
        assert_eq!(old.api_version, "kubedb.com/v1alpha2");
        assert_eq!(old.plural, "redises");
    }

    #[test]
    fn only_some_kinds_have_archivers() {
        assert!(ResourceKind::Redis.archiver_resource().is_none());
        assert!(ResourceKind::Elasticsearch.archiver_resource().is_none());

        let archiver = ResourceKind::MariaDb.archiver_resource().unwrap();
        assert_eq!(archiver.kind, "MariaDBArchiver");
        assert_eq!(archiver.plural, "mariadbarchivers");
    }

    #[test]
    fn resolves_manifest_kind_exactly() {
        assert_eq!(ResourceKind::from_kind("Redis"), Ok(ResourceKind::Redis));
        assert!(ResourceKind::from_kind("redis").is_err());
    }
}
