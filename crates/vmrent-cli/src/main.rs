//! vmrent - command-line front-end for the VM rental service.
//!
//! Signs in, shows plans and credits, and manages VMs and their disk images.
//! The session is persisted between runs and expired access tokens are
//! refreshed transparently.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmrent_core::api::{ApiClient, ApiError};
use vmrent_core::auth::{AuthError, SessionStatus, SignInRedirect, SignOutReason};
use vmrent_core::config::Config;
use vmrent_core::models::{split_disk_name, NewVm, Plan};

// ============================================================================
// Constants
// ============================================================================

/// Log file prefix in the cache directory
const LOG_FILE_PREFIX: &str = "vmrent.log";

const DEFAULT_DISK_FORMAT: &str = "qcow2";

const USAGE: &str = "\
Usage: vmrent <command> [args]

Commands:
  login [email]          Sign in (prompts for password)
  logout                 Sign out and forget stored tokens
  status                 Show session state
  whoami                 Show the signed-in account
  plans                  List available plans
  plan                   Show your current plan and credit balance
  change-plan <id>       Switch to another plan
  recharge <amount>      Buy credits for <amount> dollars
  quote                  Request an Enterprise plan quote
  credits                Show your credit balance
  vms                    List your virtual machines
  start-vm <id> [--iso]  Start a VM (optionally with its install ISO)
  stop-vm <id>           Stop a VM
  create-vm <disk> <cpus> <ram-gb> [--iso <path>]
                         Launch a VM on an existing disk
  delete-vm <id> [--keep-disk]
                         Delete a VM and, unless told otherwise, its disk
  resources <id> <cpus> <ram-gb>
                         Change CPU and memory of a VM
  create-disk <name> <size> [format]
                         Create a disk image (size like 10G, format qcow2)
  disk-info <disk>       Show disk image details
  resize-disk <disk> <+size>
                         Grow a disk image (e.g. +5G)
  convert-disk <disk> <format> [target]
                         Convert a disk image to another format
  rename-disk <disk> <new-name>
                         Rename a disk image (keeps its extension)";

/// Sign-in boundary for a terminal: tell the user how to get back in.
struct TerminalRedirect;

impl SignInRedirect for TerminalRedirect {
    fn redirect_to_sign_in(&self, reason: SignOutReason) {
        match reason {
            SignOutReason::LoggedOut => eprintln!("Signed out."),
            SignOutReason::SessionExpired(e) => {
                eprintln!("Your session has expired ({}). Run `vmrent login` to sign in again.", e)
            }
        }
    }
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug).
/// Logs go to stderr and, when the cache directory is available, to a daily file.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, "vmrent starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let client = vmrent_core::connect(&config, Arc::new(TerminalRedirect))?;

    match command.as_str() {
        "login" => login(&client, &mut config, args.get(1).cloned()).await,
        "logout" => {
            client.logout();
            Ok(())
        }
        "status" => status(&client),
        "whoami" => whoami(&client).await,
        "plans" => plans(&client).await,
        "plan" => current_plan(&client).await,
        "change-plan" => {
            let plan_id = required_arg(&args, 1, "plan id")?;
            let result = client.change_plan(plan_id).await;
            print_message(result)
        }
        "recharge" => {
            let amount: f64 = required_arg(&args, 1, "amount")?
                .parse()
                .context("Amount must be a number of dollars")?;
            match client.recharge_credits(amount).await {
                Ok(receipt) => {
                    println!("{}", receipt.message);
                    println!("Balance: {} credits", receipt.current_balance);
                    Ok(())
                }
                Err(e) => report(e),
            }
        }
        "quote" => {
            let result = client.request_enterprise_quote().await;
            print_message(result)
        }
        "credits" => match client.user_credits().await {
            Ok(balance) => {
                println!("{} credits", balance.credits);
                Ok(())
            }
            Err(e) => report(e),
        },
        "vms" => vms(&client).await,
        "start-vm" => {
            let vm_id = required_arg(&args, 1, "VM id")?;
            let include_iso = args.iter().skip(2).any(|a| a == "--iso");
            let result = client.start_vm(vm_id, include_iso).await;
            print_message(result)
        }
        "stop-vm" => {
            let vm_id = required_arg(&args, 1, "VM id")?;
            let result = client.stop_vm(vm_id).await;
            print_message(result)
        }
        "create-vm" => create_vm(&client, &args).await,
        "delete-vm" => {
            let vm_id = required_arg(&args, 1, "VM id")?;
            let delete_disk = !args.iter().skip(2).any(|a| a == "--keep-disk");
            match client.delete_vm(vm_id, delete_disk).await {
                Ok(deleted) => {
                    println!("{}", deleted.message);
                    if deleted.disk_deleted {
                        println!("Removed disk {}", deleted.disk_name.as_deref().unwrap_or("?"));
                    }
                    Ok(())
                }
                Err(e) => report(e),
            }
        }
        "resources" => {
            let vm_id = required_arg(&args, 1, "VM id")?;
            let cpus = parse_arg(&args, 2, "CPU count")?;
            let ram_gb: u64 = parse_arg(&args, 3, "RAM in GB")?;
            match client.update_vm_resources(vm_id, cpus, ram_gb * 1024).await {
                Ok(resources) => {
                    println!("{}", resources.message);
                    println!("{} CPU, {}MB RAM", resources.cpu_count, resources.memory_mb);
                    Ok(())
                }
                Err(e) => report(e),
            }
        }
        "create-disk" => {
            let name = required_arg(&args, 1, "disk name")?;
            let size = required_arg(&args, 2, "size")?;
            let format = args.get(3).map(String::as_str).unwrap_or(DEFAULT_DISK_FORMAT);
            match client.create_disk(name, size, format).await {
                Ok(disk) => {
                    println!("{}", disk.message);
                    if let Some(path) = disk.path {
                        println!("Path: {}", path);
                    }
                    Ok(())
                }
                Err(e) => report(e),
            }
        }
        "disk-info" => {
            let name = required_arg(&args, 1, "disk name")?;
            match client.disk_info(name).await {
                Ok(info) => {
                    println!("{}", info.info.trim_end());
                    Ok(())
                }
                Err(e) => report(e),
            }
        }
        "resize-disk" => {
            let name = required_arg(&args, 1, "disk name")?;
            let resize_by = required_arg(&args, 2, "size increase")?;
            match client.resize_disk(name, resize_by).await {
                Ok(resized) => {
                    println!("{}", resized.message);
                    Ok(())
                }
                Err(e) => report(e),
            }
        }
        "convert-disk" => {
            let name = required_arg(&args, 1, "disk name")?;
            let format = required_arg(&args, 2, "target format")?;
            let target = match args.get(3) {
                Some(target) => target.clone(),
                None => format!("{}.{}", split_disk_name(name).0, format),
            };
            match client.convert_disk(name, format, &target).await {
                Ok(converted) => {
                    println!("{}", converted.message);
                    println!("{} VM(s) now use {}", converted.vms_updated, target);
                    Ok(())
                }
                Err(e) => report(e),
            }
        }
        "rename-disk" => {
            let name = required_arg(&args, 1, "disk name")?;
            let new_name = required_arg(&args, 2, "new name")?;
            match client.rename_disk(name, new_name).await {
                Ok(renamed) => {
                    println!("{}", renamed.message);
                    Ok(())
                }
                Err(e) => report(e),
            }
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

fn required_arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing argument: {}", name))
}

fn parse_arg<T: std::str::FromStr>(args: &[String], index: usize, name: &str) -> Result<T> {
    required_arg(args, index, name)?
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid {}", name))
}

/// Print an API failure. Session loss has already been reported by the redirect.
fn report(err: ApiError) -> Result<()> {
    if !matches!(err, ApiError::SessionExpired(_)) {
        eprintln!("Error: {}", err);
    }
    if err.needs_sign_in() {
        std::process::exit(1);
    }
    Err(err.into())
}

fn print_message(result: Result<vmrent_core::models::StatusMessage, ApiError>) -> Result<()> {
    match result {
        Ok(message) => {
            println!("{}", message.message);
            Ok(())
        }
        Err(e) => report(e),
    }
}

async fn login(client: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => {
            print!("Email: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", email))?;

    match client.login(&email, &password).await {
        Ok(_) => {
            println!("Signed in as {}", email);
            config.last_email = Some(email);
            if let Err(e) = config.save() {
                tracing::warn!(error = %e, "Failed to save config");
            }
            Ok(())
        }
        Err(AuthError::InvalidCredentials(detail)) => {
            eprintln!("Login failed: {}", detail);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn status(client: &ApiClient) -> Result<()> {
    match client.session().status() {
        SessionStatus::Active => println!("Signed in"),
        SessionStatus::Anonymous => println!("Not signed in"),
        SessionStatus::Invalidated => println!("Session expired - sign in again"),
    }
    Ok(())
}

async fn whoami(client: &ApiClient) -> Result<()> {
    if !client.session().is_authenticated() {
        println!("Not signed in");
        return Ok(());
    }
    match client.current_user().await {
        Ok(user) => {
            println!("{} <{}> on the {} plan", user.username, user.email, user.plan);
            Ok(())
        }
        Err(e) => report(e),
    }
}

fn print_plan(plan: &Plan) {
    println!("{} ({}) - {}", plan.name, plan.id, plan.price_display());
    println!(
        "  {} credits/month, {} CPU, {}GB RAM, {}GB disk, runtime: {}",
        plan.credits_monthly,
        plan.max_cpu,
        plan.max_ram,
        plan.max_disk,
        plan.runtime_display()
    );
    for feature in &plan.features {
        println!("  - {}", feature);
    }
}

async fn plans(client: &ApiClient) -> Result<()> {
    match client.billing_plans().await {
        Ok(plans) => {
            for plan in &plans {
                print_plan(plan);
            }
            Ok(())
        }
        Err(e) => report(e),
    }
}

async fn current_plan(client: &ApiClient) -> Result<()> {
    match client.user_plan().await {
        Ok(user_plan) => {
            print_plan(&user_plan.plan);
            println!("Balance: {} credits", user_plan.balance());
            Ok(())
        }
        Err(e) => report(e),
    }
}

async fn vms(client: &ApiClient) -> Result<()> {
    match client.list_vms().await {
        Ok(vms) if vms.is_empty() => {
            println!("No VMs");
            Ok(())
        }
        Ok(vms) => {
            let running = vms.iter().filter(|vm| vm.is_running()).count();
            println!("{} VM(s), {} running", vms.len(), running);
            for vm in &vms {
                println!(
                    "{:<26} {:<20} {}",
                    vm.id,
                    vm.display_name(),
                    vm.status.as_deref().unwrap_or("unknown")
                );
            }
            Ok(())
        }
        Err(e) => report(e),
    }
}

async fn create_vm(client: &ApiClient, args: &[String]) -> Result<()> {
    let disk = required_arg(args, 1, "disk name")?;
    let cpus = parse_arg(args, 2, "CPU count")?;
    let ram_gb: u64 = parse_arg(args, 3, "RAM in GB")?;

    let mut vm = NewVm::new(disk, cpus, ram_gb * 1024);
    if let Some(pos) = args.iter().position(|a| a == "--iso") {
        vm.iso_path = Some(required_arg(args, pos + 1, "ISO path")?.to_string());
    }

    match client.create_vm(&vm).await {
        Ok(launched) => {
            match launched.pid {
                Some(pid) => println!("{} (PID {})", launched.message, pid),
                None => println!("{}", launched.message),
            }
            Ok(())
        }
        Err(e) => report(e),
    }
}
