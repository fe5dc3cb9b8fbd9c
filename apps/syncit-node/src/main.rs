use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use syncit_groups::{
    EventDraft, EventType, GroupError, GroupSession, GroupUpdate, GroupsConfig, MemberInvite,
    MemberStatus, SessionUser, TracingNotifier, UserProfile,
};
use syncit_store::{SqliteDocumentStore, StoreConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database holding the shared collections
    #[arg(long, env = "SYNCIT_DB", default_value = "syncit.db")]
    db: PathBuf,

    /// Id of the user acting
    #[arg(short, long, env = "SYNCIT_USER")]
    user: String,

    /// Display name of the user acting (defaults to the id)
    #[arg(short, long, env = "SYNCIT_NAME")]
    name: Option<String>,

    /// Patch this process's view of the groups when the database is
    /// unreachable. Nothing is saved; only useful while `watch` runs.
    #[arg(long)]
    optimistic: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the acting user's profile
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// Create, inspect and change groups
    #[command(subcommand)]
    Group(GroupCommand),
    /// Manage group members
    #[command(subcommand)]
    Member(MemberCommand),
    /// Add or delete group events
    #[command(subcommand)]
    Event(EventCommand),
    /// Find a registered user by phone number
    Lookup { phone: String },
    /// Follow the acting user's groups until interrupted
    Watch {
        /// Interval for noticing changes made by other processes
        /// (defaults to the store's poll interval)
        #[arg(long)]
        poll_ms: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    Save {
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, default_value = "")]
        country_code: String,
        #[arg(long, default_value = "")]
        email: String,
    },
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    Create {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Member to invite, as `id` or `id:Display Name`
        #[arg(short, long = "invite", value_parser = parse_invite)]
        invites: Vec<MemberInvite>,
        #[arg(long)]
        silent: bool,
    },
    List,
    Show {
        group: i64,
    },
    Delete {
        group: i64,
    },
    Update {
        group: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        silent: Option<bool>,
    },
}

#[derive(Subcommand, Debug)]
enum MemberCommand {
    Add {
        group: i64,
        #[arg(value_parser = parse_invite)]
        member: MemberInvite,
    },
    Remove {
        group: i64,
        member: String,
    },
    Status {
        group: i64,
        member: String,
        status: MemberStatus,
    },
    Promote {
        group: i64,
        member: String,
    },
    Transfer {
        group: i64,
        member: String,
    },
}

#[derive(Subcommand, Debug)]
enum EventCommand {
    Add {
        group: i64,
        /// Date as YYYY-MM-DD
        date: NaiveDate,
        #[arg(long)]
        time: Option<String>,
        #[arg(long, default_value = "")]
        notes: String,
        /// morning, afternoon, evening or all-day
        #[arg(long = "type", default_value = "all-day")]
        event_type: EventType,
    },
    Delete {
        group: i64,
        event: i64,
    },
}

fn parse_invite(value: &str) -> std::result::Result<MemberInvite, String> {
    let (id, name) = match value.split_once(':') {
        Some((id, name)) => (id.trim(), name.trim()),
        None => (value.trim(), value.trim()),
    };
    if id.is_empty() {
        return Err("member id cannot be empty".to_string());
    }
    Ok(MemberInvite::new(id, name))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Surface locally applied changes as a warning rather than a failure
fn report<T>(result: syncit_groups::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GroupError::TransientNetwork {
            message,
            applied_locally: true,
        }) => {
            warn!("Database unreachable, nothing was saved: {}", message);
            Ok(None)
        }
        Err(e) => Err(anyhow::Error::new(e.clone()).context(e.user_message())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();

    let store_config = StoreConfig {
        db_path: args.db.clone(),
        ..Default::default()
    };
    let groups_config = GroupsConfig {
        optimistic_updates: args.optimistic,
        ..Default::default()
    };

    let store = Arc::new(
        SqliteDocumentStore::open(&store_config)
            .await
            .with_context(|| format!("Failed to open {}", args.db.display()))?,
    );

    let user = SessionUser::new(
        args.user.clone(),
        args.name.clone().unwrap_or_else(|| args.user.clone()),
    );
    let session = GroupSession::start(
        user,
        store.clone(),
        Arc::new(TracingNotifier),
        groups_config.clone(),
    )
    .await?;

    match args.command {
        Command::Profile(ProfileCommand::Save {
            phone,
            country_code,
            email,
        }) => {
            let profile = session
                .directory()
                .save_profile(UserProfile {
                    id: session.user().id.clone(),
                    name: session.user().name.clone(),
                    phone,
                    email,
                    country_code,
                    profile_completed: true,
                    ..Default::default()
                })
                .await?;
            print_json(&profile)?;
        }
        Command::Group(command) => run_group(&session, command).await?,
        Command::Member(command) => run_member(&session, command).await?,
        Command::Event(command) => run_event(&session, command).await?,
        Command::Lookup { phone } => match session.directory().search_by_phone(&phone).await? {
            Some(user) => print_json(&user)?,
            None => bail!("No registered user with phone {}", phone),
        },
        Command::Watch { poll_ms } => {
            let interval = poll_ms.unwrap_or(store_config.poll_interval_ms);
            let poller = store
                .clone()
                .spawn_poller(&groups_config.collection, Duration::from_millis(interval));
            watch(&session).await?;
            poller.abort();
        }
    }

    session.close();
    Ok(())
}

async fn run_group(session: &GroupSession, command: GroupCommand) -> Result<()> {
    match command {
        GroupCommand::Create {
            name,
            description,
            invites,
            silent,
        } => {
            let group = session
                .create_group(&name, &description, invites, silent)
                .await?;
            print_json(&group)?;
        }
        GroupCommand::List => {
            for group in session.refresh().await? {
                let new_events = syncit_groups::count_new_events(&group, &session.user().id);
                println!(
                    "{}\t{}\t{} members\t{} events ({} new)",
                    group.id,
                    group.name,
                    group.members.len(),
                    group.events.len(),
                    new_events
                );
            }
        }
        GroupCommand::Show { group } => print_json(&session.get_group(group).await?)?,
        GroupCommand::Delete { group } => {
            if report(session.delete_group_for_user(group).await)?.is_some() {
                info!("Group {} deleted or left", group);
            }
        }
        GroupCommand::Update {
            group,
            name,
            description,
            silent,
        } => {
            let update = GroupUpdate {
                name,
                description,
                silent_notifications: silent,
                ..Default::default()
            };
            if update.is_empty() {
                bail!("Nothing to update");
            }
            if let Some(group) = report(session.update_group(group, update).await)? {
                print_json(&group)?;
            }
        }
    }
    Ok(())
}

async fn run_member(session: &GroupSession, command: MemberCommand) -> Result<()> {
    match command {
        MemberCommand::Add { group, member } => {
            if let Some(added) = report(session.add_members(group, vec![member]).await)? {
                print_json(&added)?;
            }
        }
        MemberCommand::Remove { group, member } => {
            if let Some(removed) = report(session.remove_member(group, &member).await)? {
                if !removed {
                    warn!("{} was not a member of group {}", member, group);
                }
            }
        }
        MemberCommand::Status {
            group,
            member,
            status,
        } => {
            if let Some(updated) =
                report(session.update_member_status(group, &member, status).await)?
            {
                print_json(&updated)?;
            }
        }
        MemberCommand::Promote { group, member } => {
            if let Some(promoted) =
                report(session.promote_member_to_admin(group, &member).await)?
            {
                print_json(&promoted)?;
            }
        }
        MemberCommand::Transfer { group, member } => {
            if let Some(group) = report(session.transfer_admin(group, &member).await)? {
                let divergent = group.admin_divergence();
                if !divergent.is_empty() {
                    warn!("Members with admin role but no ownership: {:?}", divergent);
                }
                print_json(&group)?;
            }
        }
    }
    Ok(())
}

async fn run_event(session: &GroupSession, command: EventCommand) -> Result<()> {
    match command {
        EventCommand::Add {
            group,
            date,
            time,
            notes,
            event_type,
        } => {
            let draft = EventDraft {
                date,
                time,
                notes,
                event_type,
            };
            if let Some(event) = report(session.add_event(group, draft).await)? {
                print_json(&event)?;
            }
        }
        EventCommand::Delete { group, event } => {
            report(session.delete_event(group, event).await)?;
        }
    }
    Ok(())
}

async fn watch(session: &GroupSession) -> Result<()> {
    let mut updates = session.subscribe();
    println!("Watching groups for {}, press Ctrl+C to stop", session.user().id);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                if view.loading {
                    continue;
                }
                if let Some(error) = &view.last_error {
                    warn!("Change feed error: {}", error);
                    continue;
                }
                let diff = &view.last_diff;
                println!(
                    "{} groups (+{:?} -{:?} ~{:?})",
                    view.groups.len(),
                    diff.added,
                    diff.removed,
                    diff.changed
                );
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping...");
                break;
            }
        }
    }
    Ok(())
}
