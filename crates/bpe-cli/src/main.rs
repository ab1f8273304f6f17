use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

use bpe_core::{Clock, EngineConfig, ScratchAllocator, StartRequest, SystemClock,
    TempDirScratchAllocator, WorkspaceId};
use bpe_engine::Engine;
use bpe_executor::{CommandExecutor, LocalExecutor};

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let engine = build_engine()?;

    match cli.command {
        Commands::Run {
            script,
            workspace,
            cwd,
        } => {
            let cwd = resolve_cwd(cwd)?;
            let request = StartRequest::new(WorkspaceId::new(workspace), script, cwd);
            let id = engine.start(request).await?;
            let snapshot = run_to_completion(&engine, &id).await?;
            let output = engine.get_output(&id, Some(0), None).await?;
            print!("{}", output.text);
            std::process::exit(snapshot.exit_code.unwrap_or(1));
        }
        Commands::Start {
            script,
            workspace,
            cwd,
            display_name,
        } => {
            let cwd = resolve_cwd(cwd)?;
            let mut request = StartRequest::new(WorkspaceId::new(workspace), script, cwd);
            request.display_name = display_name;
            let id = engine.start(request).await?;
            println!("{id}");
        }
        Commands::List { workspace } => {
            for snapshot in engine.list(&WorkspaceId::new(workspace)).await {
                println!(
                    "{}\t{}\t{}\t{}",
                    snapshot.id,
                    snapshot.status,
                    snapshot.pid,
                    snapshot.display_name.unwrap_or_else(|| snapshot.script.clone())
                );
            }
        }
        Commands::Tail { id, bytes } => {
            let id = bpe_core::ProcessId::from(id);
            let output = engine.get_output(&id, None, Some(bytes)).await?;
            print!("{}", output.text);
        }
        Commands::Kill { id } => {
            let id = bpe_core::ProcessId::from(id);
            engine.terminate(&id).await?;
        }
        Commands::Dispose { id } => {
            let id = bpe_core::ProcessId::from(id);
            engine.dispose(&id).await?;
        }
    }

    Ok(())
}

fn build_engine() -> Result<Engine> {
    let executor: Arc<dyn CommandExecutor> = Arc::new(LocalExecutor::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scratch: Arc<dyn ScratchAllocator> =
        Arc::new(TempDirScratchAllocator::new_in_temp_dir()?);
    Ok(Engine::new(executor, clock, scratch, EngineConfig::from_env())?)
}

fn resolve_cwd(cwd: Option<String>) -> Result<PathBuf> {
    match cwd {
        Some(c) => {
            let path = PathBuf::from(c);
            if !path.is_absolute() {
                return Err(anyhow!("--cwd must be an absolute path"));
            }
            Ok(path)
        }
        None => std::env::current_dir().map_err(Into::into),
    }
}

async fn run_to_completion(
    engine: &Engine,
    id: &bpe_core::ProcessId,
) -> Result<bpe_core::ProcessSnapshot> {
    loop {
        let snapshot = engine.get(id).await?;
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
