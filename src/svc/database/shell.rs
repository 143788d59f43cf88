//! # Shell module
//!
//! This module runs the native client of a database inside its catalog image
//! with `docker run --network=host`, reaching the database through a local
//! port-forward tunnel.

use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use kube::{api::DynamicObject, Api, Client};
use tokio::process::Command;
use tracing::debug;

use crate::svc::{
    database::credentials,
    k8s::{
        kind::ResourceKind,
        resource::{self, Info},
        secret::{PASSWORD_KEY, USERNAME_KEY},
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const DOCKER: &str = "docker";
pub const SCRIPT_PATH: &str = "/kubedb-cli/script";
pub const LOCALHOST: &str = "127.0.0.1";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0} is not supported by this command")]
    Unsupported(ResourceKind),
    #[error("{0}")]
    NotReady(String),
    #[error("failed to read database, {0}")]
    Resource(resource::Error),
    #[error("failed to read credentials, {0}")]
    Credentials(credentials::Error),
    #[error("credentials of {0} '{1}/{2}' do not contain key '{3}'")]
    MissingKey(ResourceKind, String, String, &'static str),
    #[error("failed to retrieve catalog version '{0}', {1}")]
    Catalog(String, kube::Error),
    #[error("catalog version '{0}' does not define a database image")]
    MissingImage(String),
    #[error("{0} '{1}/{2}' does not define a version")]
    MissingVersion(ResourceKind, String, String),
    #[error("failed to resolve path '{0:?}', {1}")]
    Path(PathBuf, std::io::Error),
    #[error("failed to execute '{0}', {1}")]
    Spawn(String, std::io::Error),
    #[error("command exited with {0}, {1}")]
    Exit(ExitStatus, String),
    #[error("unbalanced quotes in command '{0}'")]
    Quotes(String),
}

// -----------------------------------------------------------------------------
// Input enumeration

/// what the client is asked to run
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Input {
    Interactive,
    Command(String),
    File(PathBuf),
}

// -----------------------------------------------------------------------------
// Invocation structure

/// a `docker` command line and the file to feed on its standard input
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Invocation {
    pub args: Vec<String>,
    pub stdin: Option<PathBuf>,
}

impl Invocation {
    /// runs the invocation attached to the terminal
    pub async fn run(&self) -> Result<(), Error> {
        debug!(command = DOCKER, args = ?self.redacted(), "execute command");
        let mut command = Command::new(DOCKER);
        command.args(&self.args);
        if let Some(path) = &self.stdin {
            command.stdin(open(path).await?);
        }

        let status = command
            .status()
            .await
            .map_err(|err| Error::Spawn(DOCKER.to_string(), err))?;

        if !status.success() {
            return Err(Error::Exit(status, String::new()));
        }

        Ok(())
    }

    /// runs the invocation and returns its standard output
    pub async fn output(&self) -> Result<String, Error> {
        debug!(command = DOCKER, args = ?self.redacted(), "execute command");
        let mut command = Command::new(DOCKER);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        command.stdin(match &self.stdin {
            Some(path) => open(path).await?,
            None => Stdio::null(),
        });

        let output = command
            .output()
            .await
            .map_err(|err| Error::Spawn(DOCKER.to_string(), err))?;

        if !output.status.success() {
            return Err(Error::Exit(
                output.status,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// the arguments with secrets masked
    fn redacted(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match arg.split_once('=') {
                Some((key, _)) if secret(key) => format!("{}=***", key),
                _ => arg.to_owned(),
            })
            .collect()
    }
}

fn secret(key: &str) -> bool {
    ["PASSWORD", "PWD", "AUTH", "--password"]
        .iter()
        .any(|suffix| key.ends_with(suffix))
}

async fn open(path: &Path) -> Result<Stdio, Error> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|err| Error::Path(path.to_owned(), err))?;

    Ok(Stdio::from(file.into_std().await))
}

// -----------------------------------------------------------------------------
// Session structure

/// everything needed to reach a database with its native client
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Session {
    pub kind: ResourceKind,
    pub image: String,
    pub username: String,
    pub password: String,
    pub port: u16,
}

impl Session {
    /// reads the catalog image and the credentials of a ready database, `port`
    /// is the local end of the tunnel to the database service
    #[tracing::instrument(skip(client, info), fields(name = %info.name(), namespace = %info.namespace()))]
    pub async fn try_new(client: Client, info: &Info, port: u16) -> Result<Self, Error> {
        let database = info.database().map_err(Error::Resource)?;
        if !database.ready() {
            return Err(Error::NotReady(format!(
                "{} {}/{} is not ready",
                info.kind.singular(),
                info.namespace(),
                info.name()
            )));
        }

        let version = database
            .spec
            .version
            .ok_or_else(|| Error::MissingVersion(info.kind, info.namespace(), info.name()))?;

        let image = image(client.to_owned(), info.kind, &version).await?;
        let mut credentials = credentials::get(client, info)
            .await
            .map_err(Error::Credentials)?;

        let mut take = |key: &'static str| {
            credentials
                .remove(key)
                .ok_or_else(|| Error::MissingKey(info.kind, info.namespace(), info.name(), key))
        };

        Ok(Self {
            kind: info.kind,
            image,
            username: take(USERNAME_KEY)?,
            password: take(PASSWORD_KEY)?,
            port,
        })
    }

    /// builds the docker invocation running the client with the given input
    pub fn invocation(&self, input: &Input, database: Option<&str>) -> Result<Invocation, Error> {
        let mut args: Vec<String> = vec!["run".into(), "--rm".into(), "--network=host".into()];
        let mut stdin = None;
        let script = match input {
            Input::File(path) => Some(
                std::fs::canonicalize(path).map_err(|err| Error::Path(path.to_owned(), err))?,
            ),
            _ => None,
        };

        match input {
            Input::Interactive => args.push("-it".into()),
            Input::File(path) if self.kind == ResourceKind::Redis => {
                args.push("-i".into());
                stdin = Some(path.to_owned());
            }
            _ => {}
        }

        if let Some(script) = &script {
            if self.kind != ResourceKind::Redis {
                args.push("-v".into());
                args.push(format!("{}:{}:ro", script.display(), SCRIPT_PATH));
            }
        }

        let port = format!("--port={}", self.port);
        let host = format!("--host={}", LOCALHOST);
        match self.kind {
            ResourceKind::Postgres => {
                args.extend(["-e".into(), format!("PGPASSWORD={}", self.password)]);
                args.push(self.image.to_owned());
                args.extend(["psql".into(), host, port, format!("--username={}", self.username)]);
                if let Some(database) = database {
                    args.push(format!("--dbname={}", database));
                }

                match input {
                    Input::Command(command) => args.push(format!("--command={}", command)),
                    Input::File(_) => args.push(format!("--file={}", SCRIPT_PATH)),
                    Input::Interactive => {}
                }
            }
            ResourceKind::MySql | ResourceKind::MariaDb => {
                args.extend(["-e".into(), format!("MYSQL_PWD={}", self.password)]);
                args.push(self.image.to_owned());
                args.extend(["mysql".into(), host, port, format!("--user={}", self.username)]);
                args.push(database.unwrap_or("mysql").to_string());

                match input {
                    Input::Command(command) => args.push(format!("--execute={}", command)),
                    Input::File(_) => args.push(format!("--execute=source {}", SCRIPT_PATH)),
                    Input::Interactive => {}
                }
            }
            ResourceKind::MongoDb => {
                args.push(self.image.to_owned());
                args.extend([
                    "mongo".into(),
                    database.unwrap_or("admin").to_string(),
                    host,
                    port,
                    format!("--username={}", self.username),
                    format!("--password={}", self.password),
                    "--authenticationDatabase=admin".into(),
                ]);

                match input {
                    Input::Command(command) => {
                        args.extend(["--quiet".into(), "--eval".into(), command.to_owned()])
                    }
                    Input::File(_) => args.extend(["--quiet".into(), SCRIPT_PATH.into()]),
                    Input::Interactive => {}
                }
            }
            ResourceKind::Redis => {
                args.extend(["-e".into(), format!("REDISCLI_AUTH={}", self.password)]);
                args.push(self.image.to_owned());
                args.extend([
                    "redis-cli".into(),
                    "-h".into(),
                    LOCALHOST.into(),
                    "-p".into(),
                    self.port.to_string(),
                ]);
                if let Some(database) = database {
                    args.extend(["-n".into(), database.to_string()]);
                }

                if let Input::Command(command) = input {
                    args.extend(split_arguments(command)?);
                }
            }
            ResourceKind::Elasticsearch => return Err(Error::Unsupported(self.kind)),
        }

        Ok(Invocation { args, stdin })
    }
}

/// splits a command into arguments the way `redis-cli` does, double quoted
/// arguments support escapes while single quoted ones are taken literally
pub fn split_arguments(command: &str) -> Result<Vec<String>, Error> {
    let mut arguments = vec![];
    let mut chars = command.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            return Ok(arguments);
        }

        let mut argument = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
            match c {
                '"' => loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => argument.push('\n'),
                            Some('r') => argument.push('\r'),
                            Some('t') => argument.push('\t'),
                            Some(escaped) => argument.push(escaped),
                            None => return Err(Error::Quotes(command.to_string())),
                        },
                        Some(c) => argument.push(c),
                        None => return Err(Error::Quotes(command.to_string())),
                    }
                },
                '\'' => loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some('\\') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            argument.push('\'');
                        }
                        Some(c) => argument.push(c),
                        None => return Err(Error::Quotes(command.to_string())),
                    }
                },
                c => argument.push(c),
            }
        }

        arguments.push(argument);
    }
}

/// returns the database image defined by the catalog version
pub async fn image(client: Client, kind: ResourceKind, version: &str) -> Result<String, Error> {
    let api: Api<DynamicObject> = Api::all_with(client, &kind.version_resource());

    debug!(
        kind = kind.version_resource().kind,
        name = version,
        "execute a request to retrieve resource"
    );
    let catalog = api
        .get(version)
        .await
        .map_err(|err| Error::Catalog(version.to_string(), err))?;

    catalog.data["spec"]["db"]["image"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::MissingImage(version.to_string()))
}
