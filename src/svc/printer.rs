//! # Printer module
//!
//! This module renders kubedb objects as tables, yaml, json or names like
//! `kubectl get` does

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use chrono::{DateTime, Duration, Utc};
use prettytable::{format::consts::FORMAT_CLEAN, Row, Table};
use serde_json::{json, Value};

use crate::svc::k8s::{kind::ResourceKind, resource::Info};

// -----------------------------------------------------------------------------
// Constants

pub const UNKNOWN: &str = "<unknown>";
pub const NONE: &str = "<none>";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse output format '{0}', available options are 'wide', 'yaml', 'json' or 'name'")]
    Format(String),
    #[error("failed to serialize objects to yaml, {0}")]
    Yaml(serde_yaml::Error),
    #[error("failed to serialize objects to json, {0}")]
    Json(serde_json::Error),
}

// -----------------------------------------------------------------------------
// Format enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum Format {
    #[default]
    Table,
    Wide,
    Yaml,
    Json,
    Name,
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" => Ok(Self::Table),
            "wide" => Ok(Self::Wide),
            "yaml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "name" => Ok(Self::Name),
            _ => Err(Error::Format(s.to_string())),
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, ""),
            Self::Wide => write!(f, "wide"),
            Self::Yaml => write!(f, "yaml"),
            Self::Json => write!(f, "json"),
            Self::Name => write!(f, "name"),
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

/// renders a duration the way kubectl shortens ages
pub fn short_duration(duration: Duration) -> String {
    let seconds = duration.num_seconds();
    if seconds <= 0 {
        return "0s".to_string();
    }

    if seconds < 60 {
        return format!("{}s", seconds);
    }

    let minutes = duration.num_minutes();
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = duration.num_hours();
    if hours < 24 {
        return format!("{}h", hours);
    }

    if hours < 24 * 364 {
        return format!("{}d", hours / 24);
    }

    format!("{}y", hours / 24 / 365)
}

pub fn age(info: &Info, now: DateTime<Utc>) -> String {
    info.object
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|timestamp| short_duration(now - timestamp.0))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// returns the `<plural>.kubedb.com/<name>` form of the object
pub fn name(info: &Info) -> String {
    format!("{}/{}", info.kind.qualified(), info.name())
}

/// renders the objects in the requested format
pub fn render(
    infos: &[Info],
    format: Format,
    all_namespaces: bool,
    now: DateTime<Utc>,
) -> Result<String, Error> {
    match format {
        Format::Table | Format::Wide => Ok(tables(infos, format == Format::Wide, all_namespaces, now)),
        Format::Name => Ok(infos.iter().map(|info| format!("{}\n", name(info))).collect()),
        Format::Yaml => serde_yaml::to_string(&document(infos)).map_err(Error::Yaml),
        Format::Json => serde_json::to_string_pretty(&document(infos))
            .map(|s| s + "\n")
            .map_err(Error::Json),
    }
}

/// a single object is printed as is, several ones are wrapped in a list
fn document(infos: &[Info]) -> Value {
    let mut objects: Vec<Value> = infos
        .iter()
        .map(|info| serde_json::to_value(&info.object).unwrap_or(Value::Null))
        .collect();

    if objects.len() == 1 {
        return objects.remove(0);
    }

    json!({
        "apiVersion": "v1",
        "kind": "List",
        "metadata": { "resourceVersion": "" },
        "items": objects,
    })
}

/// one table per kind, separated by a blank line
fn tables(infos: &[Info], wide: bool, all_namespaces: bool, now: DateTime<Utc>) -> String {
    let mut output = vec![];

    for kind in ResourceKind::ALL {
        let infos: Vec<&Info> = infos.iter().filter(|info| info.kind == kind).collect();
        if infos.is_empty() {
            continue;
        }

        let mut table = Table::new();
        table.set_format(*FORMAT_CLEAN);

        let mut header = vec![];
        if all_namespaces {
            header.push("NAMESPACE");
        }
        header.extend(["NAME", "VERSION", "STATUS", "AGE"]);
        if wide {
            header.extend(["REPLICAS", "MODE"]);
        }
        table.set_titles(Row::from(header));

        for info in infos {
            table.add_row(Row::from(columns(info, wide, all_namespaces, now)));
        }

        output.push(table.to_string());
    }

    output.join("\n")
}

fn columns(info: &Info, wide: bool, all_namespaces: bool, now: DateTime<Utc>) -> Vec<String> {
    let database = info.database().unwrap_or_default();
    let mut columns = vec![];

    if all_namespaces {
        columns.push(info.namespace());
    }

    columns.extend([
        info.name(),
        database.spec.version.to_owned().unwrap_or_default(),
        database.status.phase.to_owned().unwrap_or_default(),
        age(info, now),
    ]);

    if wide {
        columns.push(
            database
                .spec
                .replicas
                .map(|replicas| replicas.to_string())
                .unwrap_or_else(|| NONE.to_string()),
        );
        columns.push(crate::svc::k8s::resource::mode(info.kind, &info.object));
    }

    columns
}
