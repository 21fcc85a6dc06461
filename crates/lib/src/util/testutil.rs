//! Test utilities for stackflow-lib.
//!
//! Builders for the desired states most unit tests start from.

use std::collections::BTreeMap;

use crate::config::Environment;
use crate::model::{
  ActionDecl, BucketDecl, DeployAction, DesiredState, PipelineDecl, PublicAccess, RemovalPolicy, SourceAction,
  StageDecl, TriggerMode, WebsiteConfig,
};

pub fn test_env() -> Environment {
  Environment::new("eu-west-1").with_account("123456789012")
}

pub fn plain_bucket(id: &str) -> BucketDecl {
  BucketDecl {
    id: id.to_string(),
    name: None,
    versioned: false,
    public_access: PublicAccess::BlockAll,
    website: None,
    removal_policy: RemovalPolicy::Destroy,
    tags: BTreeMap::new(),
  }
}

pub fn website_bucket(id: &str) -> BucketDecl {
  BucketDecl {
    website: Some(WebsiteConfig {
      index_document: Some("index.html".to_string()),
      error_document: Some("error.html".to_string()),
    }),
    public_access: PublicAccess::BlockAcls,
    ..plain_bucket(id)
  }
}

/// Two-stage pipeline reading `source` and deploying to `target`.
pub fn promote_pipeline(id: &str, source: &str, target: &str) -> PipelineDecl {
  PipelineDecl {
    id: id.to_string(),
    name: None,
    stages: vec![
      StageDecl {
        name: "Source".to_string(),
        actions: vec![ActionDecl::Source(SourceAction {
          name: "ReadStaging".to_string(),
          bucket: source.to_string(),
          object_key: "site.zip".to_string(),
          output: "SiteArtifact".to_string(),
          trigger: TriggerMode::Events,
        })],
      },
      StageDecl {
        name: "Deploy".to_string(),
        actions: vec![ActionDecl::Deploy(DeployAction {
          name: "DeploySite".to_string(),
          bucket: target.to_string(),
          input: "SiteArtifact".to_string(),
          extract: true,
        })],
      },
    ],
  }
}

/// Versioned `staging`, website `prod` and a pipeline promoting one to the other.
pub fn site_state() -> DesiredState {
  let mut staging = plain_bucket("staging");
  staging.versioned = true;

  DesiredState {
    stack: "site".to_string(),
    buckets: vec![staging, website_bucket("prod")],
    pipelines: vec![promote_pipeline("promote", "staging", "prod")],
    ..DesiredState::default()
  }
}
