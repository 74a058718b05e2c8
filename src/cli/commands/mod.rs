//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! Each handler builds a plan from its arguments and runs it through
//! [`run_plan`], or performs a read-only query. Plans run on a blocking
//! worker thread while the async runtime waits for Ctrl-C; an interrupt
//! sets the run's cancel flag, which aborts the current network operation.

mod audit;
mod completion;
mod deploy;
mod purge;
mod remote;
mod revert_origin;
mod verify;

pub use audit::audit;
pub use completion::completion;
pub use deploy::deploy;
pub use purge::purge;
pub use remote::{remote_add, remote_list, remote_remove};
pub use revert_origin::revert_origin;
pub use verify::verify;

use anyhow::{Context as _, Result};

use crate::cli::args::{Command, MatchArgs, RemoteAction};
use crate::cli::Refused;
use crate::core::config::Config;
use crate::core::paths::ScourPaths;
use crate::engine::{
    Context, DeployError, DeployReport, DeploymentPlan, Orchestrator, OrchestratorSettings,
};
use crate::git::{CancelFlag, Git};
use crate::purge::{DirectoryPolicy, PathPredicate, PurgeMode, PurgeSpec};
use crate::remotes::{CredentialResolver, RegistryError, RemoteRegistry};
use crate::secrets;
use crate::ui::output::{self, Verbosity};

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Purge {
            matcher,
            keep_only,
            prune_empty,
            no_ignore,
        } => purge(ctx, &matcher, keep_only, prune_empty, no_ignore),
        Command::Deploy {
            target,
            force,
            refs,
            url,
            purge: purge_paths,
        } => deploy(
            ctx,
            target.as_deref(),
            force,
            &refs,
            url.as_deref(),
            &purge_paths,
        ),
        Command::RevertOrigin { url, remote } => revert_origin(ctx, &url, remote.as_deref()),
        Command::Verify { matcher } => verify(ctx, &matcher),
        Command::Remote { action } => match action {
            RemoteAction::Add {
                name,
                url,
                role,
                auth,
                takeover,
            } => remote_add(ctx, &name, &url, role, auth, takeover),
            RemoteAction::List => remote_list(ctx),
            RemoteAction::Remove { name } => remote_remove(ctx, &name),
        },
        Command::Audit { limit } => audit(ctx, limit),
        Command::Completion { shell } => completion(shell),
    }
}

/// An opened repository with its storage paths and merged config.
pub(crate) struct Session {
    pub git: Git,
    pub paths: ScourPaths,
    pub config: Config,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        let cwd = match &ctx.cwd {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("cannot determine current directory")?,
        };
        let git = Git::open(&cwd).context("failed to open repository")?;
        let paths = ScourPaths::for_handle(&git);
        let config = Config::load(Some(&paths)).context("failed to load configuration")?;
        Ok(Self { git, paths, config })
    }

    /// The stored registry plus any git remotes it does not know yet.
    pub fn registry(&self) -> Result<RemoteRegistry, RegistryError> {
        let mut registry = RemoteRegistry::load(&self.paths)?;
        let adopted = registry.adopt_git_remotes(&self.git)?;
        if !adopted.is_empty() {
            tracing::debug!(?adopted, "adopted git remotes");
        }
        Ok(registry)
    }

    /// Credential resolver over the configured secret store.
    ///
    /// A store that cannot be opened only matters to `secret:` bindings,
    /// which then fail when resolved.
    pub fn credentials(&self) -> CredentialResolver {
        let store = match secrets::create_store(self.config.secrets_provider()) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "secret store unavailable");
                None
            }
        };
        CredentialResolver::new(store)
    }
}

pub(crate) fn verbosity(ctx: &Context) -> Verbosity {
    Verbosity::from_flags(ctx.quiet, ctx.debug)
}

/// Build a purge spec from match flags, filling unset policy from config.
pub(crate) fn build_spec(
    config: &Config,
    args: &MatchArgs,
    mode: PurgeMode,
    prune_empty: bool,
) -> Result<PurgeSpec> {
    let mut predicates: Vec<PathPredicate> = args
        .paths
        .iter()
        .cloned()
        .map(PathPredicate::Exact)
        .chain(args.globs.iter().cloned().map(PathPredicate::Glob))
        .chain(args.content.iter().cloned().map(PathPredicate::Content))
        .collect();

    let predicate = match predicates.len() {
        0 => {
            return Err(Refused("nothing to match; pass --path, --glob or --content".into()).into())
        }
        1 => predicates.remove(0),
        _ => PathPredicate::AnyOf(predicates),
    };

    let spec = PurgeSpec {
        predicate,
        mode,
        directory_policy: if args.files_only {
            DirectoryPolicy::FilesOnly
        } else {
            config.directory_policy()
        },
        prune_empty: prune_empty || config.prune_empty(),
    };
    spec.matcher().map_err(DeployError::from)?;
    Ok(spec)
}

/// Run a plan on a worker thread, cancelling it on Ctrl-C.
pub(crate) fn run_plan(ctx: &Context, plan: DeploymentPlan) -> Result<DeployReport> {
    let verbosity = verbosity(ctx);
    tracing::debug!(op_id = %plan.op_id, "plan:\n{}", plan.preview());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let cancel = CancelFlag::new();
    let worker_ctx = ctx.clone();
    let worker_cancel = cancel.clone();

    let joined = runtime.block_on(async move {
        let mut task =
            tokio::task::spawn_blocking(move || execute_plan(&worker_ctx, plan, worker_cancel));
        tokio::select! {
            joined = &mut task => joined,
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupt received; cancelling network operations");
                eprintln!("interrupted; stopping at the next safe point");
                cancel.cancel();
                task.await
            }
        }
    });

    let report = joined.context("deployment worker stopped unexpectedly")??;
    for warning in &report.warnings {
        output::warn(warning, verbosity);
    }
    Ok(report)
}

fn execute_plan(ctx: &Context, plan: DeploymentPlan, cancel: CancelFlag) -> Result<DeployReport> {
    let session = Session::open(ctx)?;
    let registry = session.registry().map_err(DeployError::from)?;
    let credentials = session.credentials();
    let settings = OrchestratorSettings::from_config(&session.config);

    let mut orchestrator = Orchestrator::new(
        &session.git,
        session.paths.clone(),
        registry,
        &credentials,
        settings,
    )
    .with_cancel(cancel);
    Ok(orchestrator.run(plan)?)
}
