//! CLI binary for operating a local student-perks ledger.

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};
use edu_perks::error::{EduPerksError, ErrorKind};
use edu_perks::ledger::Issuance;
use edu_perks::marketplace::MarketplaceBlocking;
use edu_perks::models::{
    AuditLogEntry, Identity, KycStatus, Merchant, MerchantId, NewOffer, OfferId,
    OfferStatus, Redemption, RedemptionMethod, RedemptionSnapshot, RedemptionStatus, Role,
    Student, StudentId, UserId, VerificationStatus, require_role,
};
use edu_perks::projection::{MerchantRedemption, OfferListing, OfferStats, ReviewQueue};
use edu_perks::storage::{BlockingStorage, FileStorage};
use edu_perks::verification::ScanInput;
use owo_colors::OwoColorize;

/// Environment variable naming the signed-in user.
const USER_ENV: &str = "EDU_PERKS_USER";
/// Environment variable naming the signed-in user's role.
const ROLE_ENV: &str = "EDU_PERKS_ROLE";

/// Student perks ledger: issue coupons and verify them in store.
#[derive(Debug, Parser)]
#[command(name = "edu-perks", version, about)]
struct Cli {
    /// Override the storage directory (default: XDG data dir).
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// User the command acts as.
    #[arg(long, global = true, env = USER_ENV)]
    user: Option<String>,
    /// Role of the acting user (student, merchant or admin).
    #[arg(long, global = true, env = ROLE_ENV)]
    role: Option<Role>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// List offers students can redeem right now.
    Offers,
    /// Register a merchant profile awaiting KYC review.
    AddMerchant {
        /// Merchant identifier.
        id: String,
        /// Owning user account.
        #[arg(long)]
        user_id: String,
        /// Registered legal name.
        #[arg(long)]
        legal_name: String,
        /// Name shown to students (defaults to the legal name).
        #[arg(long)]
        trade_name: Option<String>,
    },
    /// Approve a merchant's KYC (admin).
    ApproveMerchant {
        /// Merchant identifier.
        id: String,
    },
    /// Register a student profile awaiting email verification.
    AddStudent {
        /// Student identifier.
        id: String,
        /// Owning user account.
        #[arg(long)]
        user_id: String,
        /// Contact email.
        #[arg(long)]
        email: String,
        /// Display name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Mark a student's email as verified.
    VerifyStudent {
        /// Student identifier.
        id: String,
    },
    /// Publish an offer for the signed-in merchant.
    CreateOffer(OfferArgs),
    /// Change an offer's status (admin).
    SetStatus {
        /// Offer identifier.
        offer: String,
        /// New status (draft, active or expired).
        #[arg(value_parser = parse_status)]
        status: OfferStatus,
    },
    /// Issue a redemption of an offer.
    ///
    /// Without --student the signed-in student is used.
    Issue {
        /// Offer identifier.
        offer: String,
        /// Issue on behalf of this student (admin).
        #[arg(long)]
        student: Option<String>,
    },
    /// Verify and consume a token for the signed-in merchant.
    Verify {
        /// Token text, as pasted from the QR payload.
        #[arg(long, conflicts_with = "token_file", required_unless_present = "token_file")]
        token: Option<String>,
        /// File containing the token text.
        #[arg(long, value_name = "FILE")]
        token_file: Option<PathBuf>,
    },
    /// List redemptions of a merchant's offers or held by a student.
    Redemptions {
        /// Merchant whose offers to list.
        #[arg(long, conflicts_with = "student", required_unless_present = "student")]
        merchant: Option<String>,
        /// Student whose redemptions to list.
        #[arg(long)]
        student: Option<String>,
    },
    /// Show issuance and usage counters of an offer.
    Stats {
        /// Offer identifier.
        offer: String,
    },
    /// Show draft offers and merchants awaiting KYC (admin).
    Review,
    /// Show the audit trail (admin), optionally for one entity.
    Audit {
        /// Only entries about this entity.
        #[arg(long)]
        entity: Option<String>,
    },
}

/// Arguments for the `create-offer` subcommand.
#[derive(Debug, Args)]
struct OfferArgs {
    /// Display title.
    #[arg(long)]
    title: String,
    /// Longer description.
    #[arg(long)]
    description: String,
    /// Free-form category.
    #[arg(long)]
    category: String,
    /// Discount in percent (0 to 100).
    #[arg(long)]
    discount: u8,
    /// Where students are sent to redeem online.
    #[arg(long)]
    url: String,
    /// How redemptions are presented (code, qr or link).
    #[arg(long, default_value = "qr", value_parser = parse_method)]
    method: RedemptionMethod,
    /// Maximum number of students; 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    cap: u32,
    /// Static coupon code handed to every student.
    #[arg(long)]
    code: Option<String>,
    /// Validity window in days.
    #[arg(long)]
    days: Option<u32>,
}

impl From<OfferArgs> for NewOffer {
    fn from(args: OfferArgs) -> Self {
        Self {
            title: args.title,
            description: args.description,
            category: args.category,
            discount_percent: args.discount,
            redirect_url: args.url,
            redemption_type: args.method,
            student_cap: args.cap,
            code_template: args.code,
            valid_for_days: args.days,
        }
    }
}

/// Parses an offer status for clap.
fn parse_status(value: &str) -> Result<OfferStatus, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "draft" => Ok(OfferStatus::Draft),
        "active" => Ok(OfferStatus::Active),
        "expired" => Ok(OfferStatus::Expired),
        other => Err(format!("unknown offer status: {other}")),
    }
}

/// Parses a redemption method for clap.
fn parse_method(value: &str) -> Result<RedemptionMethod, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "code" => Ok(RedemptionMethod::Code),
        "qr" => Ok(RedemptionMethod::Qr),
        "link" => Ok(RedemptionMethod::Link),
        other => Err(format!("unknown redemption method: {other}")),
    }
}

/// Builds the caller identity from `--user` and `--role`.
fn identity(user: Option<String>, role: Option<Role>) -> Option<Identity> {
    user.filter(|name| !name.trim().is_empty())
        .zip(role)
        .map(|(name, granted)| Identity::new(UserId::from(name), granted))
}

/// Runs the CLI, returning an appropriate exit code.
fn run() -> io::Result<ExitCode> {
    let _dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let storage = match create_storage(cli.data_dir) {
        Ok(storage) => storage,
        Err(err) => {
            writeln!(
                io::stderr().lock(),
                "{} failed to initialize storage: {err}",
                "error:".red().bold()
            )?;
            return Ok(ExitCode::FAILURE);
        }
    };

    let market = match MarketplaceBlocking::builder().storage(storage).build() {
        Ok(market) => market,
        Err(err) => {
            writeln!(
                io::stderr().lock(),
                "{} failed to build marketplace: {err}",
                "error:".red().bold()
            )?;
            return Ok(ExitCode::FAILURE);
        }
    };

    let caller = identity(cli.user, cli.role);
    dispatch(&market, caller.as_ref(), cli.command)
}

/// Creates the storage backend, using `data_dir` if provided or the
/// default XDG data directory otherwise.
fn create_storage(data_dir: Option<PathBuf>) -> edu_perks::error::Result<FileStorage> {
    let dir = match data_dir {
        Some(dir) => dir,
        None => FileStorage::default_dir()?,
    };
    FileStorage::new(dir)
}

/// Dispatches to the appropriate subcommand handler.
fn dispatch<S: BlockingStorage>(
    market: &MarketplaceBlocking<S>,
    caller: Option<&Identity>,
    command: Command,
) -> io::Result<ExitCode> {
    match command {
        Command::Offers => finish(market.offer_listings(), |listings| {
            print_offers_table(&listings)
        }),
        Command::AddMerchant {
            id,
            user_id,
            legal_name,
            trade_name,
        } => {
            let merchant = Merchant {
                id: MerchantId::from(id),
                user_id: UserId::from(user_id),
                trade_name: trade_name.unwrap_or_else(|| legal_name.clone()),
                legal_name,
                kyc_status: KycStatus::Pending,
            };
            cmd_add_merchant(market, merchant)
        }
        Command::ApproveMerchant { id } => finish(
            market.approve_merchant(caller, &MerchantId::from(id)),
            |merchant| print_done(&format!("merchant {} is {}", merchant.id, merchant.kyc_status)),
        ),
        Command::AddStudent {
            id,
            user_id,
            email,
            name,
        } => {
            let student = Student {
                id: StudentId::from(id),
                user_id: UserId::from(user_id),
                name,
                email,
                verification_status: VerificationStatus::Pending,
            };
            cmd_add_student(market, student)
        }
        Command::VerifyStudent { id } => {
            finish(market.verify_student(&StudentId::from(id)), |student| {
                print_done(&format!("student {} is {}", student.id, student.verification_status))
            })
        }
        Command::CreateOffer(args) => finish(market.create_offer(caller, args.into()), |offer| {
            let merchant_name = offer.merchant_id.to_string();
            print_offers_table(&[OfferListing {
                offer,
                merchant_name,
            }])
        }),
        Command::SetStatus { offer, status } => finish(
            market.set_offer_status(caller, &OfferId::from(offer), status),
            |updated| print_done(&format!("offer {} is {}", updated.id, updated.status)),
        ),
        Command::Issue { offer, student } => {
            cmd_issue(market, caller, &OfferId::from(offer), student)
        }
        Command::Verify { token, token_file } => cmd_verify(market, caller, token, token_file),
        Command::Redemptions {
            merchant: Some(merchant_id),
            ..
        } => finish(
            market.redemptions_for_merchant(&MerchantId::from(merchant_id)),
            |rows| print_merchant_redemptions(&rows),
        ),
        Command::Redemptions {
            merchant: None,
            student,
        } => {
            let student_id = StudentId::from(student.unwrap_or_default());
            finish(market.redemptions_for_student(&student_id), |held| {
                print_student_redemptions(&held)
            })
        }
        Command::Stats { offer } => finish(market.offer_stats(&OfferId::from(offer)), |stats| {
            print_stats(&stats)
        }),
        Command::Review => {
            finish(market.review_queue(caller), |queue| print_review_queue(&queue))
        }
        Command::Audit { entity } => {
            let entries = match entity {
                Some(entity_id) => require_admin(caller)
                    .and_then(|()| market.audit_trail(&entity_id)),
                None => market.audit_log(caller),
            };
            finish(entries, |log| print_audit_table(&log))
        }
    }
}

/// Executes the `add-merchant` subcommand.
fn cmd_add_merchant<S: BlockingStorage>(
    market: &MarketplaceBlocking<S>,
    merchant: Merchant,
) -> io::Result<ExitCode> {
    finish(market.register_merchant(merchant), |stored| {
        print_done(&format!(
            "merchant {} registered (kyc {})",
            stored.id, stored.kyc_status
        ))
    })
}

/// Executes the `add-student` subcommand.
fn cmd_add_student<S: BlockingStorage>(
    market: &MarketplaceBlocking<S>,
    student: Student,
) -> io::Result<ExitCode> {
    finish(market.register_student(student), |stored| {
        print_done(&format!(
            "student {} registered (verification {})",
            stored.id, stored.verification_status
        ))
    })
}

/// Executes the `issue` subcommand. Issuing on behalf of another student
/// is reserved to admins.
fn cmd_issue<S: BlockingStorage>(
    market: &MarketplaceBlocking<S>,
    caller: Option<&Identity>,
    offer_id: &OfferId,
    student: Option<String>,
) -> io::Result<ExitCode> {
    let outcome = match student {
        Some(student_id) => require_admin(caller)
            .and_then(|()| market.issue_redemption(offer_id, &StudentId::from(student_id))),
        None => market.issue_for(caller, offer_id),
    };
    finish(outcome, |issuance| print_issuance(&issuance))
}

/// Executes the `verify` subcommand: reads the token from the argument or
/// the file and consumes it for the signed-in merchant.
fn cmd_verify<S: BlockingStorage>(
    market: &MarketplaceBlocking<S>,
    caller: Option<&Identity>,
    token: Option<String>,
    token_file: Option<PathBuf>,
) -> io::Result<ExitCode> {
    let text = match (token, token_file) {
        (Some(text), _) => text,
        (None, Some(path)) => match read_token_file(&path)? {
            Some(text) => text,
            None => return Ok(ExitCode::FAILURE),
        },
        (None, None) => String::new(),
    };
    finish(market.verify(caller, ScanInput::Manual(text)), |snapshot| {
        print_snapshot(&snapshot)
    })
}

/// Rejects callers that are not admins.
fn require_admin(caller: Option<&Identity>) -> edu_perks::error::Result<()> {
    require_role(caller, Role::Admin).map(|_admin| ())
}

/// Reads token text from a file, printing an error on failure.
fn read_token_file(path: &Path) -> io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) => {
            writeln!(
                io::stderr().lock(),
                "{} failed to read {}: {err}",
                "error:".red().bold(),
                path.display()
            )?;
            Ok(None)
        }
    }
}

/// Prints the result of an operation, returning the exit code.
fn finish<T, F>(outcome: edu_perks::error::Result<T>, on_success: F) -> io::Result<ExitCode>
where
    F: FnOnce(T) -> io::Result<()>,
{
    match outcome {
        Ok(value) => {
            on_success(value)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            print_error(&err)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

// ── Output formatting ────────────────────────────────────────────────

/// Prints an error with its user-facing message.
fn print_error(err: &EduPerksError) -> io::Result<()> {
    let mut out = io::stderr().lock();
    let kind = err.kind();
    let label = if kind.is_business_state() {
        format!("{}", "rejected:".yellow().bold())
    } else {
        format!("{}", "error:".red().bold())
    };
    writeln!(out, "{label} {}", kind.message())?;
    writeln!(out, "  {} {err}", "detail:".dimmed())?;
    if let Some(prior) = err.prior_use() {
        let when = prior
            .redeemed_at
            .map_or_else(|| "\u{2014}".to_owned(), |at| at.to_rfc3339());
        let by = prior
            .verified_by
            .as_ref()
            .map_or_else(|| "\u{2014}".to_owned(), ToString::to_string);
        writeln!(out, "  {} {when} by {by}", "used:".cyan())?;
    }
    if kind == ErrorKind::Forbidden {
        writeln!(
            out,
            "  {} set --user/--role or {USER_ENV}/{ROLE_ENV}",
            "hint:".cyan()
        )?;
    }
    Ok(())
}

/// Prints a one-line confirmation.
fn print_done(message: &str) -> io::Result<()> {
    writeln!(io::stdout().lock(), "{} {message}", "done:".green().bold())
}

/// Creates a table with the shared preset and a cyan header.
fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    _ = table.load_preset(UTF8_FULL);
    _ = table.set_header(
        header
            .iter()
            .map(|title| Cell::new(title).fg(Color::Cyan))
            .collect::<Vec<_>>(),
    );
    table
}

/// Prints a titled table, or a dimmed note when there are no rows.
fn print_titled(title: &str, count: usize, table: &Table) -> io::Result<()> {
    let mut out = io::stdout().lock();
    if count == 0 {
        let lowered = title.to_lowercase();
        writeln!(out, "{}", format_args!("No {lowered} found.").dimmed())?;
        return Ok(());
    }
    writeln!(
        out,
        "{} {}",
        title.green().bold(),
        format_args!("({count})").dimmed()
    )?;
    writeln!(out)?;
    writeln!(out, "{table}")?;
    Ok(())
}

/// Prints offers in a table.
fn print_offers_table(listings: &[OfferListing]) -> io::Result<()> {
    let mut table = new_table(&["Id", "Title", "Merchant", "Discount", "Method", "Issued", "Ends"]);
    for listing in listings {
        let offer = &listing.offer;
        let issued = if offer.student_cap == 0 {
            offer.redemption_count.to_string()
        } else {
            format!("{}/{}", offer.redemption_count, offer.student_cap)
        };
        let issued_cell = if offer.is_at_capacity() {
            Cell::new(issued).fg(Color::Red)
        } else {
            Cell::new(issued)
        };
        _ = table.add_row(vec![
            Cell::new(&offer.id),
            Cell::new(&offer.title),
            Cell::new(&listing.merchant_name),
            Cell::new(format!("{}%", offer.discount_percent)),
            Cell::new(offer.redemption_type),
            issued_cell,
            Cell::new(offer.end_at.format("%Y-%m-%d")),
        ]);
    }
    print_titled("Offers", listings.len(), &table)
}

/// Prints the admin review queue as two tables.
fn print_review_queue(queue: &ReviewQueue) -> io::Result<()> {
    let mut drafts = new_table(&["Id", "Title", "Merchant", "Discount", "Created"]);
    for offer in &queue.draft_offers {
        _ = drafts.add_row(vec![
            Cell::new(&offer.id),
            Cell::new(&offer.title),
            Cell::new(&offer.merchant_id),
            Cell::new(format!("{}%", offer.discount_percent)),
            Cell::new(format_when(Some(offer.created_at))),
        ]);
    }
    print_titled("Draft offers", queue.draft_offers.len(), &drafts)?;

    let mut merchants = new_table(&["Id", "Trade name", "Legal name", "User"]);
    for merchant in &queue.pending_merchants {
        _ = merchants.add_row(vec![
            Cell::new(&merchant.id),
            Cell::new(&merchant.trade_name),
            Cell::new(&merchant.legal_name),
            Cell::new(&merchant.user_id),
        ]);
    }
    print_titled("Pending merchants", queue.pending_merchants.len(), &merchants)
}

/// Prints a freshly issued or existing redemption.
fn print_issuance(issuance: &Issuance) -> io::Result<()> {
    let mut out = io::stdout().lock();
    let heading = if issuance.newly_issued {
        "Redemption issued"
    } else {
        "Redemption already issued"
    };
    writeln!(out, "{}", heading.green().bold())?;
    writeln!(out)?;
    writeln!(out, "  {} {}", "Id:".bold(), issuance.redemption.id)?;
    writeln!(out, "  {} {}", "Code:".bold(), issuance.redemption.coupon_code)?;
    writeln!(out, "  {} {}", "Status:".bold(), issuance.redemption.status)?;
    if let Some(token) = issuance.token.as_deref() {
        writeln!(out, "  {} {token}", "Token:".bold())?;
    }
    Ok(())
}

/// Prints the snapshot of a consumed redemption.
fn print_snapshot(snapshot: &RedemptionSnapshot) -> io::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{}", "Redemption verified".green().bold())?;
    writeln!(out)?;
    writeln!(out, "  {} {}", "Student:".bold(), snapshot.display_name())?;
    writeln!(out, "  {} {}", "Email:".bold(), snapshot.student_email)?;
    writeln!(
        out,
        "  {} {} ({}% off)",
        "Offer:".bold(),
        snapshot.offer_title,
        snapshot.discount_percent
    )?;
    writeln!(out, "  {} {}", "Code:".bold(), snapshot.coupon_code)?;
    if let Some(at) = snapshot.redeemed_at {
        writeln!(out, "  {} {}", "Redeemed:".bold(), at.to_rfc3339())?;
    }
    Ok(())
}

/// Returns a coloured status cell.
fn status_cell(status: RedemptionStatus) -> Cell {
    match status {
        RedemptionStatus::Issued => Cell::new(status).fg(Color::Yellow),
        RedemptionStatus::Redeemed => Cell::new(status).fg(Color::Green),
    }
}

/// Formats an optional timestamp.
fn format_when(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map_or_else(
        || "\u{2014}".to_owned(),
        |when| when.format("%Y-%m-%d %H:%M").to_string(),
    )
}

/// Prints redemptions of a merchant's offers in a table.
fn print_merchant_redemptions(rows: &[MerchantRedemption]) -> io::Result<()> {
    let mut table = new_table(&["Code", "Offer", "Student", "Status", "Issued", "Redeemed"]);
    for row in rows {
        _ = table.add_row(vec![
            Cell::new(&row.redemption.coupon_code),
            Cell::new(&row.offer_title),
            Cell::new(&row.redemption.student_id),
            status_cell(row.redemption.status),
            Cell::new(format_when(Some(row.redemption.issued_at))),
            Cell::new(format_when(row.redemption.redeemed_at)),
        ]);
    }
    print_titled("Redemptions", rows.len(), &table)
}

/// Prints a student's redemptions in a table.
fn print_student_redemptions(held: &[Redemption]) -> io::Result<()> {
    let mut table = new_table(&["Code", "Offer", "Method", "Status", "Issued", "Redeemed"]);
    for redemption in held {
        _ = table.add_row(vec![
            Cell::new(&redemption.coupon_code),
            Cell::new(&redemption.offer_id),
            Cell::new(redemption.method),
            status_cell(redemption.status),
            Cell::new(format_when(Some(redemption.issued_at))),
            Cell::new(format_when(redemption.redeemed_at)),
        ]);
    }
    print_titled("Redemptions", held.len(), &table)
}

/// Prints offer counters.
fn print_stats(stats: &OfferStats) -> io::Result<()> {
    let mut table = new_table(&["Counter", "Value"]);
    let cap = if stats.student_cap == 0 {
        "unlimited".to_owned()
    } else {
        stats.student_cap.to_string()
    };
    let remaining = stats
        .remaining()
        .map_or_else(|| "\u{2014}".to_owned(), |left| left.to_string());
    let rows = [
        ("Cap", cap),
        ("Issued", stats.issued.to_string()),
        ("Used", stats.used.to_string()),
        ("Outstanding", stats.outstanding().to_string()),
        ("Remaining", remaining),
    ];
    for (name, value) in rows {
        _ = table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    let mut out = io::stdout().lock();
    writeln!(out, "{} {}", stats.title.green().bold(), format_args!("({})", stats.offer_id).dimmed())?;
    writeln!(out)?;
    writeln!(out, "{table}")?;
    Ok(())
}

/// Prints audit entries in a table.
fn print_audit_table(entries: &[AuditLogEntry]) -> io::Result<()> {
    let mut table = new_table(&["When", "Actor", "Entity", "Action", "Meta"]);
    for entry in entries {
        let actor = entry
            .actor_id
            .as_ref()
            .map_or_else(|| "system".to_owned(), ToString::to_string);
        _ = table.add_row(vec![
            Cell::new(format_when(Some(entry.created_at))),
            Cell::new(actor),
            Cell::new(format!("{} {}", entry.entity, entry.entity_id)),
            Cell::new(&entry.action),
            Cell::new(&entry.meta),
        ]);
    }
    print_titled("Audit entries", entries.len(), &table)
}

/// Entry point.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            let _ignored = writeln!(io::stderr(), "fatal I/O error: {err}");
            ExitCode::FAILURE
        }
    }
}
