//! # Delete module
//!
//! This module provides the `delete` command which deletes kubedb databases
//! by name, by label selector or from manifests

use std::sync::Arc;

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, DynamicObject},
    Api, Client, ResourceExt,
};
use tracing::debug;

use crate::{
    cmd::{no_resources, Aggregate, Context, Executor, Target},
    svc::k8s::{
        client,
        kind::ResourceKind,
        manifest,
        resource::{self, Selection},
        State,
    },
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to select resources, {0}")]
    Resource(resource::Error),
    #[error("failed to load manifest, {0}")]
    Manifest(manifest::Error),
    #[error("name cannot be provided when a selector or --all is specified")]
    NamesWithSelector,
    #[error("resource(s) were provided, but no name, label selector, or --all flag specified")]
    MissingNames,
    #[error("unable to parse output format '{0}', only 'name' is allowed")]
    Output(String),
    #[error("failed to delete {0} '{1}/{2}', {3}")]
    Delete(ResourceKind, String, String, kube::Error),
    #[error("{0}")]
    Aggregate(Aggregate),
}

// -----------------------------------------------------------------------------
// Delete structure

#[derive(clap::Args, Clone, Debug)]
pub struct Delete {
    #[clap(flatten)]
    pub target: Target,
    /// Delete every database of the given types in the namespace
    #[clap(long = "all")]
    pub all: bool,
    /// Output mode, 'name' prints the short form of the deleted databases
    #[clap(short = 'o', long = "output")]
    pub output: Option<String>,
    /// Treat "resource not found" as a successful delete, default to true
    /// with --all or --selector
    #[clap(long = "ignore-not-found", num_args = 0..=1, default_missing_value = "true")]
    pub ignore_not_found: Option<bool>,
}

/// an object to delete
#[derive(PartialEq, Eq, Clone, Debug)]
struct Object {
    kind: ResourceKind,
    namespace: String,
    name: String,
}

impl Delete {
    fn short_output(&self) -> Result<bool, Error> {
        match self.output.as_deref() {
            None | Some("") => Ok(false),
            Some("name") => Ok(true),
            Some(other) => Err(Error::Output(other.to_string())),
        }
    }

    fn ignore_not_found(&self) -> bool {
        self.ignore_not_found
            .unwrap_or(self.all || self.target.selector.is_some())
    }

    /// returns what the command line designates
    async fn objects(&self, state: &State, errors: &mut Aggregate) -> Result<Vec<Object>, Error> {
        let mut objects = vec![];

        for file in &self.target.files {
            match manifest::read(file).await.and_then(|content| manifest::parse(&content)) {
                Ok(parsed) => objects.extend(parsed.into_iter().map(|(kind, object)| Object {
                    kind,
                    namespace: object
                        .namespace()
                        .unwrap_or_else(|| state.namespace(&self.target.namespace)),
                    name: object.name_any(),
                })),
                Err(err) => errors.push(Error::Manifest(err)),
            }
        }

        if !self.target.files.is_empty() {
            return Ok(objects);
        }

        let selections = Selection::parse(&self.target.resources).map_err(Error::Resource)?;
        let named = selections.iter().any(|selection| !selection.names.is_empty());
        let listing = self.all || self.target.selector.is_some();

        match (named, listing) {
            (true, true) => return Err(Error::NamesWithSelector),
            (false, false) => return Err(Error::MissingNames),
            (true, false) => {
                let namespace = state.namespace(&self.target.namespace);
                for selection in selections {
                    objects.extend(selection.names.into_iter().map(|name| Object {
                        kind: selection.kind,
                        namespace: namespace.to_owned(),
                        name,
                    }));
                }
            }
            (false, true) => {
                let (infos, errs) =
                    resource::resolve(&state.kube, &self.target.scope(state), &selections).await;

                errs.iter().for_each(|err| errors.push(err));
                objects.extend(infos.into_iter().map(|info| Object {
                    kind: info.kind,
                    namespace: info.namespace(),
                    name: info.name(),
                }));
            }
        }

        Ok(objects)
    }
}

#[async_trait]
impl Executor for Delete {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let short = self.short_output()?;
        let state = ctx.state().await.map_err(Error::Client)?;
        let mut errors = Aggregate::default();

        let objects = self.objects(&state, &mut errors).await?;
        if objects.is_empty() && errors.is_empty() {
            eprintln!("{}", no_resources(&self.target.scope(&state)));
            return Ok(());
        }

        for object in objects {
            match delete(state.kube.to_owned(), &object, self.ignore_not_found()).await {
                Ok(false) => {}
                Ok(true) if short => println!("{}/{}", object.kind.qualified(), object.name),
                Ok(true) => println!("{} \"{}\" deleted", object.kind.singular(), object.name),
                Err(err) => errors.push(err),
            }
        }

        errors.into_result().map_err(Error::Aggregate)
    }
}

// -----------------------------------------------------------------------------
// helpers

/// deletes the object, returns false when it does not exist and missing
/// objects are ignored
async fn delete(client: Client, object: &Object, ignore_not_found: bool) -> Result<bool, Error> {
    let api: Api<DynamicObject> = Api::namespaced_with(
        client,
        &object.namespace,
        &object.kind.api_resource(),
    );

    debug!(
        kind = object.kind.kind(),
        namespace = &object.namespace,
        name = &object.name,
        "execute a request to delete resource"
    );

    match api.delete(&object.name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(err)) if err.code == 404 && ignore_not_found => Ok(false),
        Err(err) => Err(Error::Delete(
            object.kind,
            object.namespace.to_owned(),
            object.name.to_owned(),
            err,
        )),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use hyper::Method;
    use serde_json::json;

    use super::*;
    use crate::{
        cmd::{Args, Command},
        svc::k8s::mock::{self, Exchange},
    };

    const POSTGRESES: &str = "/apis/kubedb.com/v1/namespaces/demo/postgreses";

    fn postgres(name: &str) -> serde_json::Value {
        json!({
            "apiVersion": "kubedb.com/v1",
            "kind": "Postgres",
            "metadata": {"name": name, "namespace": "demo"}
        })
    }

    fn parse(args: &[&str]) -> Delete {
        let args = Args::try_parse_from(["kubectl-dba", "delete"].iter().chain(args)).unwrap();
        match args.command {
            Some(Command::Delete(delete)) => delete,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn ignores_missing_objects_when_listing() {
        assert!(!parse(&["pg", "a"]).ignore_not_found());
        assert!(parse(&["pg", "--all"]).ignore_not_found());
        assert!(parse(&["pg", "-l", "app=a"]).ignore_not_found());
        assert!(parse(&["pg", "a", "--ignore-not-found"]).ignore_not_found());
        assert!(!parse(&["pg", "--all", "--ignore-not-found=false"]).ignore_not_found());
    }

    #[test]
    fn accepts_name_output_only() {
        assert!(!parse(&["pg", "a"]).short_output().unwrap());
        assert!(parse(&["pg", "a", "-o", "name"]).short_output().unwrap());
        assert!(matches!(
            parse(&["pg", "a", "-o", "yaml"]).short_output(),
            Err(Error::Output(_))
        ));
    }

    #[tokio::test]
    async fn deletes_listed_objects_ignoring_missing_ones() {
        let (client, server) = mock::client(vec![
            Exchange::new(
                Method::GET,
                POSTGRESES,
                mock::list(vec![postgres("pg-a"), postgres("pg-b")]),
            ),
            Exchange::new(Method::DELETE, &format!("{}/pg-a", POSTGRESES), postgres("pg-a")),
            Exchange::not_found(Method::DELETE, &format!("{}/pg-b", POSTGRESES)),
        ]);

        let state = mock::state(client);
        let delete_all = parse(&["pg", "--all"]);
        let mut errors = Aggregate::default();

        let objects = delete_all.objects(&state, &mut errors).await.unwrap();
        assert!(errors.is_empty());
        assert_eq!(
            objects.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
            vec!["pg-a", "pg-b"]
        );

        let ignore = delete_all.ignore_not_found();
        assert!(delete(state.kube.to_owned(), &objects[0], ignore).await.unwrap());
        assert!(!delete(state.kube.to_owned(), &objects[1], ignore).await.unwrap());

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn reports_missing_named_objects() {
        let (client, _server) =
            mock::client(vec![Exchange::not_found(Method::DELETE, &format!("{}/pg-a", POSTGRESES))]);

        let object = Object {
            kind: ResourceKind::Postgres,
            namespace: "demo".to_string(),
            name: "pg-a".to_string(),
        };

        assert!(matches!(
            delete(client, &object, false).await,
            Err(Error::Delete(ResourceKind::Postgres, _, _, _))
        ));
    }
}
