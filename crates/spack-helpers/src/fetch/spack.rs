use super::{
    FetchError, PackageInstaller, PackageStager, ToolInvocation, ToolOutcome, ToolRunner,
};
use crate::graph::PackageNode;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Stages, locates and installs packages through the `spack` executable,
/// always addressing nodes by `/hash` inside the given environment.
pub struct SpackCli<R> {
    program: PathBuf,
    env_root: PathBuf,
    runner: R,
}

impl<R: ToolRunner> SpackCli<R> {
    pub fn new(program: impl Into<PathBuf>, env_root: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            program: program.into(),
            env_root: env_root.into(),
            runner,
        }
    }

    fn invocation(&self, args: &[&str]) -> ToolInvocation {
        let mut argv = vec!["-e".to_string(), self.env_root.display().to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        ToolInvocation {
            program: self.program.clone(),
            args: argv,
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    async fn spack(&self, args: &[&str]) -> Result<ToolOutcome, FetchError> {
        let invocation = self.invocation(args);
        debug!(command = %invocation.display_command(), "running spack");
        self.runner.run(&invocation).await
    }
}

fn hash_ref(node: &PackageNode) -> String {
    format!("/{}", node.hash)
}

fn first_line(outcome: &ToolOutcome) -> Option<PathBuf> {
    outcome
        .stdout_tail
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(PathBuf::from)
}

fn failure_message(outcome: &ToolOutcome) -> String {
    if outcome.timed_out {
        return "timed out".to_string();
    }
    let stderr = outcome.stderr_tail.trim();
    if stderr.is_empty() {
        format!("exit code {:?}", outcome.exit_code)
    } else {
        stderr.to_string()
    }
}

#[async_trait]
impl<R: ToolRunner> PackageStager for SpackCli<R> {
    async fn stage(&self, node: &PackageNode) -> Result<PathBuf, FetchError> {
        let hash = hash_ref(node);
        let staged = self.spack(&["stage", &hash]).await?;
        if !staged.success {
            return Err(FetchError::Stage {
                package: node.to_string(),
                message: failure_message(&staged),
            });
        }
        let located = self.spack(&["location", "--source-dir", &hash]).await?;
        match first_line(&located) {
            Some(dir) if located.success => Ok(dir),
            _ => Err(FetchError::Stage {
                package: node.to_string(),
                message: format!("could not locate source directory: {}", failure_message(&located)),
            }),
        }
    }
}

#[async_trait]
impl<R: ToolRunner> PackageInstaller for SpackCli<R> {
    async fn prefix(&self, node: &PackageNode) -> Result<Option<PathBuf>, FetchError> {
        let located = self
            .spack(&["location", "--install-dir", &hash_ref(node)])
            .await?;
        if !located.success {
            return Ok(None);
        }
        Ok(first_line(&located).filter(|p| p.is_dir()))
    }

    async fn install(&self, node: &PackageNode) -> Result<(), FetchError> {
        let installed = self.spack(&["install", &hash_ref(node)]).await?;
        if installed.success {
            Ok(())
        } else {
            Err(FetchError::Install {
                package: node.to_string(),
                message: failure_message(&installed),
            })
        }
    }
}
