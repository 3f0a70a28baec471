//! Scripted collaborators and temp workspaces for tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use crate::cancel::CancelToken;
use crate::io::approval::{Approver, Decision, Preview};
use crate::io::boundary::WorkspaceBoundary;
use crate::io::decider::{ClientError, Decider};
use crate::io::gateway::{Gateway, GatewayConfig};
use crate::io::prompt::Prompt;

/// Decider that replays canned responses and records every prompt it saw.
///
/// Once the script runs out it reports a network error.
pub struct ScriptedDecider {
    responses: Mutex<VecDeque<Result<String, ClientError>>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedDecider {
    pub fn new(responses: Vec<Result<String, ClientError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Convenience for scripts without failures.
    pub fn replies(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok((*r).to_string())).collect())
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl Decider for ScriptedDecider {
    fn request_decision(&self, prompt: &Prompt) -> Result<String, ClientError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| Err(ClientError::Network("script exhausted".to_string())))
    }
}

/// Approver that answers from a script (rejecting once it runs out) and
/// records every preview.
pub struct ScriptedApprover {
    decisions: Mutex<VecDeque<Decision>>,
    previews: Mutex<Vec<Preview>>,
    timeouts: Mutex<Vec<Option<Duration>>>,
}

impl ScriptedApprover {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            previews: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
        }
    }

    pub fn previews(&self) -> Vec<Preview> {
        self.previews.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// The deadline passed with each preview.
    pub fn timeouts(&self) -> Vec<Option<Duration>> {
        self.timeouts.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl Approver for ScriptedApprover {
    fn present_diff(&self, preview: &Preview, timeout: Option<Duration>) -> Decision {
        if let Ok(mut previews) = self.previews.lock() {
            previews.push(preview.clone());
        }
        if let Ok(mut timeouts) = self.timeouts.lock() {
            timeouts.push(timeout);
        }
        self.decisions
            .lock()
            .ok()
            .and_then(|mut d| d.pop_front())
            .unwrap_or(Decision::Rejected)
    }
}

/// A temp directory wired up as a workspace with a gateway and boundary.
pub struct TestWorkspace {
    pub temp: TempDir,
    pub boundary: WorkspaceBoundary,
    pub gateway: Gateway,
    pub approver: Arc<ScriptedApprover>,
    pub cancel: CancelToken,
}

impl TestWorkspace {
    pub fn new(approver: ScriptedApprover) -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let boundary = WorkspaceBoundary::with_default_denied(temp.path())?;
        let approver = Arc::new(approver);
        let gateway = Gateway::new(
            GatewayConfig::for_root(boundary.root()),
            Arc::clone(&approver) as Arc<dyn Approver>,
        );
        Ok(Self {
            temp,
            boundary,
            gateway,
            approver,
            cancel: CancelToken::new(),
        })
    }

    /// Canonical workspace root.
    pub fn root(&self) -> &Path {
        self.boundary.root()
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.root().join(rel)).ok()
    }
}
