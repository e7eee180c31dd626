use cert_mailer::certificate_index::CertificateIndex;
use cert_mailer::delivery::{DeliveryOrchestrator, RunSummary, StopReason};
use cert_mailer::input::{read_recipients, RowResult};
use cert_mailer::ledger::SentLedger;
use cert_mailer::mailer::{Mailer, SmtpMailer};
use cert_mailer::pacing::{NoDelay, Pacer, SleepPacer, StopSignal};
use cert_mailer::template::EmailTemplate;
use cert_mailer::Config;
use clap::{Arg, Command};
use log::LevelFilter;
use std::process;

/// Exit status for a run that stopped before the end of the input.
const EXIT_INCOMPLETE: i32 = 2;

#[tokio::main]
async fn main() {
    let matches = Command::new("cert-mailer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Email pre-generated certificates to congress attendees and presenters")
        .long_about("cert-mailer matches each registration row to its certificate file,\n\
                    sends it by SMTP and records every delivery in a JSON ledger so an\n\
                    interrupted or rate-limited run can be resumed without duplicates.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("cert-mailer.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate configuration, certificates, ledger and input without sending")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("test")
                .long("test")
                .value_name("EMAIL")
                .help("Check the SMTP login; with EMAIL also send one test message")
                .num_args(0..=1)
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Walk the input and report what would be sent, without sending")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("cert-mailer.yaml");

    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Error: invalid configuration {config_path}: {e:#}");
        process::exit(1);
    }

    if matches.contains_id("test") {
        let recipient = matches.get_one::<String>("test").cloned();
        run_connection_test(&config, recipient.as_deref()).await;
        return;
    }

    if matches.get_flag("test-config") {
        test_config(&config, config_path);
        return;
    }

    let dry_run = matches.get_flag("dry-run");
    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Received interrupt, finishing the current email before stopping...");
        handler_stop.request();
    }) {
        log::warn!("Failed to install interrupt handler: {e}");
    }

    let rows = match read_recipients(&config.input) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("Error reading {}: {e}", config.input.path.display());
            process::exit(1);
        }
    };

    let template = match EmailTemplate::from_config(&config.template) {
        Ok(template) => template,
        Err(e) => {
            eprintln!("Error loading email template: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = template.validate(config.input.columns.is_presenter_flow()) {
        eprintln!("Error in email template: {e}");
        process::exit(1);
    }

    // A dry run never connects, so it does not need the password.
    let mailer = if dry_run {
        SmtpMailer::with_password(&config.smtp, None)
    } else {
        SmtpMailer::new(&config.smtp)
    };
    let mailer = match mailer {
        Ok(mailer) => mailer,
        Err(e) => {
            eprintln!("Error configuring SMTP: {e:#}");
            process::exit(1);
        }
    };

    let summary = if dry_run {
        deliver(&config, template, mailer, NoDelay, stop, &rows, true).await
    } else {
        let pacer = SleepPacer::new(stop.clone());
        deliver(&config, template, mailer, pacer, stop, &rows, false).await
    };

    print_summary(&summary, dry_run);
    if summary.ledger_out_of_sync() {
        process::exit(1);
    }
    if !summary.is_complete() {
        process::exit(EXIT_INCOMPLETE);
    }
}

async fn deliver<M: Mailer, P: Pacer>(
    config: &Config,
    template: EmailTemplate,
    mailer: M,
    pacer: P,
    stop: StopSignal,
    rows: &[RowResult],
    dry_run: bool,
) -> RunSummary {
    let orchestrator = DeliveryOrchestrator::new(
        config.campaign.clone(),
        config.pacing.clone(),
        template,
        mailer,
        pacer,
    )
    .with_stop_signal(stop)
    .with_dry_run(dry_run);

    log::info!("Starting certificate delivery...");
    match orchestrator.run(rows).await {
        Ok(summary) => summary,
        Err(e) => {
            log::error!("Delivery stopped: {e}");
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
            println!(
                "The SMTP password is read from the {} environment variable.",
                config.smtp.password_env
            );
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

async fn run_connection_test(config: &Config, recipient: Option<&str>) {
    println!("🧪 Testing SMTP configuration...");
    println!();
    println!("  Server: {}:{}", config.smtp.server, config.smtp.port());
    println!("  TLS: {:?}", config.smtp.tls);
    println!(
        "  User: {}",
        config.smtp.username.as_deref().unwrap_or("<anonymous>")
    );
    println!();

    let mailer = match SmtpMailer::new(&config.smtp) {
        Ok(mailer) => mailer,
        Err(e) => {
            println!("❌ Cannot configure SMTP: {e:#}");
            process::exit(1);
        }
    };

    if let Err(e) = mailer.verify().await {
        println!("❌ SMTP connection test failed: {e}");
        println!();
        println!("💡 Check the server, port, TLS mode and the password in ${}", config.smtp.password_env);
        process::exit(1);
    }
    println!("✅ SMTP connection and login successful");

    if let Some(to) = recipient {
        match mailer.send_test(to, &config.template.test_subject).await {
            Ok(()) => println!("✅ Test email sent to {to}"),
            Err(e) => {
                println!("❌ Failed to send test email to {to}: {e}");
                process::exit(1);
            }
        }
    }
}

fn test_config(config: &Config, config_path: &str) {
    println!("🔍 Testing configuration {config_path}...");
    println!();

    let naming = config.campaign.naming();
    match CertificateIndex::build(&config.campaign.certificates_dir, &naming) {
        Ok(index) => println!(
            "  Certificates indexed: {} in {}",
            index.len(),
            config.campaign.certificates_dir.display()
        ),
        Err(e) => {
            println!("❌ Certificate directory: {e}");
            process::exit(1);
        }
    }

    match SentLedger::load(&config.campaign.ledger_path) {
        Ok(ledger) => println!(
            "  Ledger entries: {} in {}",
            ledger.len(),
            config.campaign.ledger_path.display()
        ),
        Err(e) => {
            println!("❌ Ledger: {e}");
            process::exit(1);
        }
    }

    match read_recipients(&config.input) {
        Ok(rows) => {
            let malformed = rows.iter().filter(|row| row.is_err()).count();
            println!("  Input rows: {} ({malformed} malformed)", rows.len());
            for error in rows.iter().filter_map(|row| row.as_ref().err()) {
                println!("    • {error}");
            }
        }
        Err(e) => {
            println!("❌ Input {}: {e}", config.input.path.display());
            process::exit(1);
        }
    }

    let presenter_flow = config.input.columns.is_presenter_flow();
    let template = EmailTemplate::from_config(&config.template)
        .and_then(|template| template.validate(presenter_flow));
    if let Err(e) = template {
        println!("❌ Template: {e}");
        process::exit(1);
    }
    println!(
        "  Campaign: {}",
        if presenter_flow {
            "presentations (name + title)"
        } else {
            "attendance (name)"
        }
    );
    println!();
    println!("✅ Configuration validated");
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    println!();
    println!("📊 Delivery summary{}", if dry_run { " (dry run)" } else { "" });
    println!("═══════════════════════════════════════");
    if dry_run {
        println!("  Would send: {}", summary.planned);
    } else {
        println!("  Sent: {}", summary.sent);
    }
    println!("  Skipped, already sent: {}", summary.skipped_already_sent);
    println!("  Skipped, no email: {}", summary.skipped_no_email);
    println!("  Certificates not found: {}", summary.not_found);
    println!("  Failed: {}", summary.errored);
    println!("  Malformed rows: {}", summary.malformed);
    println!("  Total sent to date: {}", summary.ledger_total);

    if !summary.not_found_identities.is_empty() {
        println!();
        println!("🔎 No certificate found for:");
        for name in &summary.not_found_identities {
            println!("  • {name}");
        }
    }

    if !summary.approximate_matches.is_empty() {
        println!();
        println!("⚠️  Approximate matches used (please double-check):");
        for matched in &summary.approximate_matches {
            println!("  • {} → {}", matched.name, matched.certificate.display());
        }
    }

    if !summary.failures.is_empty() {
        println!();
        println!("❌ Failed deliveries:");
        for failure in &summary.failures {
            println!("  • {} <{}>: {}", failure.name, failure.email, failure.reason);
        }
    }

    if !summary.malformed_rows.is_empty() {
        println!();
        println!("📭 Malformed rows:");
        for error in &summary.malformed_rows {
            println!("  • {error}");
        }
    }

    match &summary.stop {
        Some(StopReason::RateLimited(reason)) => {
            println!();
            println!("🛑 Sending limit reached: {reason}");
            println!(
                "   {} rows left. Progress is saved; run again later to continue.",
                summary.remaining
            );
        }
        Some(StopReason::Interrupted) => {
            println!();
            println!(
                "🛑 Interrupted with {} rows left. Run again to continue.",
                summary.remaining
            );
        }
        Some(StopReason::Unrecorded { key, email, reason }) => {
            println!();
            println!("🛑 Certificate sent to {email} but the ledger could not record it: {reason}");
            println!("   Add \"{key}\" to the ledger by hand before running again,");
            println!("   otherwise {email} will receive it twice. {} rows left.", summary.remaining);
        }
        None => {}
    }
}
