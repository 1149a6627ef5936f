mod api;
mod app;
mod board;
mod cache;
mod commands;
mod config;
mod event;
mod logging;
mod ui;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::info;

use api::resources::Entity;
use api::types::{
  Company, Department, Invoice, LeaveRequest, Notification, Permission, Project, Role, Task, Team,
  TenantUser,
};
use api::{ApiClient, CachedClient, SessionStore};
use cache::{Filter, QueryCache};

#[derive(Parser, Debug)]
#[command(name = "taskeri")]
#[command(about = "A terminal client for the Taskeri project management backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/taskeri/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Project id to open on the board at startup
  #[arg(short, long)]
  project: Option<u64>,

  #[command(subcommand)]
  command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
  /// Sign in and store the session (password from TASKERI_PASSWORD)
  Login {
    /// Defaults to api.username from the config
    #[arg(short, long)]
    username: Option<String>,
  },
  /// Forget the stored session
  Logout,
  /// Show the signed-in user
  Whoami,
  /// Print one page of a collection as JSON lines
  List {
    #[arg(value_enum)]
    resource: ListTarget,

    #[arg(long, default_value_t = 1)]
    page: u64,

    #[arg(long, default_value_t = 50)]
    page_size: u64,
  },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ListTarget {
  Tasks,
  Projects,
  Teams,
  Departments,
  Companies,
  LeaveRequests,
  Notifications,
  Roles,
  Permissions,
  Invoices,
  TenantUsers,
}

async fn print_page<E: Entity>(api: &ApiClient, page: u64, page_size: u64) -> Result<()> {
  let filter = Filter::new().page(page).page_size(page_size);
  let page = api.list::<E>(&filter).await?;
  for item in &page.items {
    println!("{}", serde_json::to_string(item)?);
  }
  if page.has_next() {
    eprintln!(
      "page {} of {}, next: --page {}",
      page.page,
      page.page_count(),
      page.page + 1
    );
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = logging::init()?;

  let args = Args::parse();

  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(project) = args.project {
    config.default_project = Some(project);
  }

  let session = SessionStore::open(&config.api.url, config.api.tenant_id.clone())?;
  let api = ApiClient::new(&config, session)?;
  info!(url = %config.api.url, "Starting taskeri");

  match args.command {
    Some(CliCommand::Login { username }) => {
      let username = username
        .or_else(|| config.api.username.clone())
        .ok_or_else(|| eyre!("No username given and api.username is not set"))?;
      let password = config::Config::get_password()
        .ok_or_else(|| eyre!("Set TASKERI_PASSWORD to log in from the command line"))?;
      let user = match api.login(&username, &password).await? {
        Some(user) => user,
        None => api.current_user().await?,
      };
      println!("Signed in as {}", user.display_name());
    }
    Some(CliCommand::Logout) => {
      api.logout();
      println!("Signed out");
    }
    Some(CliCommand::Whoami) => {
      let user = api.current_user().await?;
      println!("{} <{}>", user.display_name(), user.email);
    }
    Some(CliCommand::List { resource, page, page_size }) => {
      match resource {
        ListTarget::Tasks => print_page::<Task>(&api, page, page_size).await?,
        ListTarget::Projects => print_page::<Project>(&api, page, page_size).await?,
        ListTarget::Teams => print_page::<Team>(&api, page, page_size).await?,
        ListTarget::Departments => print_page::<Department>(&api, page, page_size).await?,
        ListTarget::Companies => print_page::<Company>(&api, page, page_size).await?,
        ListTarget::LeaveRequests => print_page::<LeaveRequest>(&api, page, page_size).await?,
        ListTarget::Notifications => print_page::<Notification>(&api, page, page_size).await?,
        ListTarget::Roles => print_page::<Role>(&api, page, page_size).await?,
        ListTarget::Permissions => print_page::<Permission>(&api, page, page_size).await?,
        ListTarget::Invoices => print_page::<Invoice>(&api, page, page_size).await?,
        ListTarget::TenantUsers => print_page::<TenantUser>(&api, page, page_size).await?,
      }
    }
    None => {
      let client = CachedClient::new(api, QueryCache::new(config.cache.to_cache_config()));
      let mut app = app::App::new(config, client);
      app.run().await?;
    }
  }

  Ok(())
}
