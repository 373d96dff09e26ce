use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{AgencyService, RegisterApplicant, ServiceConfig};
use crate::domain::{
    Amount, CancellationPolicy, PolicyCategory, TransportRoute, TransportSelection,
    TriggerCondition, TripType, VoucherScope, VoucherValue, format_amount, parse_amount,
};
use crate::io::Exporter;

/// Itinera - Agency Pricing & Ledger
#[derive(Parser)]
#[command(name = "itinera")]
#[command(about = "Pricing and ledger tool for an exam-registration and travel agency")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "itinera.db")]
    pub database: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init {
        /// Unified registration price (also the retake base fee)
        #[arg(long)]
        registration_price: Option<String>,

        /// Currency label for display
        #[arg(long)]
        currency: Option<String>,
    },

    /// Applicant management commands
    #[command(subcommand)]
    Applicant(ApplicantCommands),

    /// Ticket management commands
    #[command(subcommand)]
    Ticket(TicketCommands),

    /// Transport route management commands
    #[command(subcommand)]
    Route(RouteCommands),

    /// Cancellation/modification policy commands
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// Voucher management commands
    #[command(subcommand)]
    Voucher(VoucherCommands),

    /// Record an agency expense
    Expense {
        /// Amount (e.g. "4,000" or "4000")
        amount: String,

        /// Branch/office
        #[arg(short, long)]
        location: Option<String>,

        /// Description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Record a till withdrawal
    Withdraw {
        /// Amount
        amount: String,

        /// Branch/office
        #[arg(short, long)]
        location: Option<String>,

        /// Description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Generate reports
    #[command(subcommand)]
    Report(ReportCommands),

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, applicants, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Verify ledger integrity
    Check,
}

#[derive(Subcommand)]
pub enum ApplicantCommands {
    /// Register a new applicant
    Register {
        /// Full name
        name: String,

        /// Phone number for notifications
        #[arg(long)]
        phone: Option<String>,

        /// Transport selection: none, one_way, round_trip
        #[arg(long, default_value = "none")]
        transport: String,

        /// Origin location (required with transport)
        #[arg(long)]
        from: Option<String>,

        /// Exam location (transport destination)
        #[arg(long)]
        exam_location: Option<String>,

        /// Promo code (mutually exclusive with --discount)
        #[arg(long)]
        promo: Option<String>,

        /// Manual discount amount
        #[arg(long)]
        discount: Option<String>,

        /// Initial deposit
        #[arg(long, default_value = "0")]
        deposit: String,

        /// Branch recording the deposit
        #[arg(long)]
        location: Option<String>,
    },

    /// Show an applicant by code
    Show {
        /// Applicant code
        code: String,
    },

    /// List all applicants
    List,

    /// Record a payment from an applicant
    Pay {
        /// Applicant code
        code: String,

        /// Amount
        amount: String,

        /// Branch/office
        #[arg(short, long)]
        location: Option<String>,

        /// Description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Book the exam slot
    ScheduleExam {
        /// Applicant code
        code: String,

        /// Exam date (YYYY-MM-DD)
        date: String,

        /// Exam time (HH:MM)
        time: String,

        /// Exam location
        location: String,
    },

    /// Mark the applicant as having attended the exam
    Attended {
        /// Applicant code
        code: String,
    },

    /// Mark the applicant as a no-show for the exam
    Absent {
        /// Applicant code
        code: String,
    },

    /// Record the exam result
    Result {
        /// Applicant code
        code: String,

        /// Outcome: pass or fail
        outcome: String,
    },

    /// Undo a recorded exam result (admin override)
    UndoResult {
        /// Applicant code
        code: String,
    },

    /// Schedule an exam retake (fee applies unless waived by a voucher)
    Retake {
        /// Applicant code
        code: String,

        /// New exam date (YYYY-MM-DD)
        date: String,

        /// New exam time (HH:MM)
        time: String,

        /// New exam location
        location: String,

        /// Specific voucher to redeem (defaults to first active grant)
        #[arg(long)]
        voucher: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum TicketCommands {
    /// Issue a new ticket
    Issue {
        /// Applicant code
        code: String,

        /// Departure location
        #[arg(long)]
        from: String,

        /// Arrival location
        #[arg(long)]
        to: String,

        /// Trip type: one_way, round_trip
        #[arg(long, default_value = "one_way")]
        trip: String,

        /// Departure date (YYYY-MM-DD)
        date: String,

        /// Departure time (HH:MM)
        time: String,

        /// Credit voucher IDs to redeem (may repeat)
        #[arg(long)]
        voucher: Vec<String>,
    },

    /// Modify an issued ticket's route or trip type
    Modify {
        /// Ticket ID
        id: String,

        /// New departure location
        #[arg(long)]
        from: String,

        /// New arrival location
        #[arg(long)]
        to: String,

        /// New trip type: one_way, round_trip
        #[arg(long)]
        trip: String,

        /// New departure date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        /// New departure time (HH:MM)
        #[arg(long)]
        time: Option<String>,
    },

    /// Cancel an issued ticket (compensation voucher is created)
    Cancel {
        /// Ticket ID
        id: String,
    },

    /// Mark a ticket as travelled
    Used {
        /// Ticket ID
        id: String,
    },

    /// Mark a ticket as a no-show
    NoShow {
        /// Ticket ID
        id: String,
    },

    /// List an applicant's tickets
    List {
        /// Applicant code
        code: String,
    },
}

#[derive(Subcommand)]
pub enum RouteCommands {
    /// Add a transport route
    Add {
        /// Departure location
        from: String,

        /// Arrival location
        to: String,

        /// One-way fare
        #[arg(long)]
        one_way: String,

        /// Round-trip fare
        #[arg(long)]
        round_trip: String,

        /// Scheduled departure time (HH:MM)
        #[arg(long)]
        departure: Option<String>,

        /// Scheduled arrival time (HH:MM)
        #[arg(long)]
        arrival: Option<String>,
    },

    /// List all routes
    List,
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Add a fee policy
    Add {
        /// Policy name
        name: String,

        /// Category: cancellation, modification, no_show, route_change
        #[arg(long)]
        category: String,

        /// Hours-before-departure trigger (omit for a category default)
        #[arg(long)]
        hours: Option<f64>,

        /// Condition: less_than, greater_than (defaults to less_than)
        #[arg(long)]
        condition: Option<String>,

        /// Fee amount
        #[arg(long)]
        fee: String,
    },

    /// List all policies
    List,
}

#[derive(Subcommand)]
pub enum VoucherCommands {
    /// Create a public promo code
    Promo {
        /// Code (matched case-sensitively at redemption)
        code: String,

        /// Discount percentage (0-100)
        #[arg(long)]
        percent: i64,

        /// Usage cap
        #[arg(long)]
        max_uses: i64,

        /// Expiry date (YYYY-MM-DD)
        #[arg(long)]
        expires: Option<String>,
    },

    /// Grant a personal voucher to an applicant
    Grant {
        /// Applicant code
        code: String,

        /// Scope: exam, exam_retake, full_program, transport
        #[arg(long, default_value = "exam_retake")]
        scope: String,

        /// Percentage discount (defaults to a full waiver)
        #[arg(long)]
        percent: Option<i64>,

        /// Fixed credit balance instead of a percentage
        #[arg(long)]
        credit: Option<String>,
    },

    /// List vouchers (all, or one applicant's)
    List {
        /// Applicant code
        #[arg(long)]
        applicant: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Accounting totals by kind and branch
    Ledger {
        /// Start date (YYYY-MM-DD)
        from: String,

        /// End date (YYYY-MM-DD, exclusive)
        to: String,
    },

    /// Applicants still owing money
    Outstanding,

    /// Passenger manifest for a route and day
    Manifest {
        /// Departure location
        from: String,

        /// Arrival location
        to: String,

        /// Departure day (YYYY-MM-DD)
        date: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init {
                registration_price,
                currency,
            } => {
                let mut config = ServiceConfig::default();
                if let Some(price) = registration_price {
                    config.registration_price = parse_money(&price)?;
                }
                if let Some(currency) = currency {
                    config.currency = currency;
                }
                AgencyService::init(&self.database, config).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Applicant(cmd) => {
                let service = AgencyService::connect(&self.database).await?;
                run_applicant_command(&service, cmd).await?;
            }

            Commands::Ticket(cmd) => {
                let service = AgencyService::connect(&self.database).await?;
                run_ticket_command(&service, cmd).await?;
            }

            Commands::Route(cmd) => {
                let service = AgencyService::connect(&self.database).await?;
                run_route_command(&service, cmd).await?;
            }

            Commands::Policy(cmd) => {
                let service = AgencyService::connect(&self.database).await?;
                run_policy_command(&service, cmd).await?;
            }

            Commands::Voucher(cmd) => {
                let service = AgencyService::connect(&self.database).await?;
                run_voucher_command(&service, cmd).await?;
            }

            Commands::Expense {
                amount,
                location,
                description,
            } => {
                let service = AgencyService::connect(&self.database).await?;
                let entry = service
                    .record_expense(parse_money(&amount)?, location, description)
                    .await?;
                println!("Recorded expense: {} ({})", format_amount(entry.amount), entry.id);
            }

            Commands::Withdraw {
                amount,
                location,
                description,
            } => {
                let service = AgencyService::connect(&self.database).await?;
                let entry = service
                    .record_withdrawal(parse_money(&amount)?, location, description)
                    .await?;
                println!(
                    "Recorded withdrawal: {} ({})",
                    format_amount(entry.amount),
                    entry.id
                );
            }

            Commands::Report(cmd) => {
                let service = AgencyService::connect(&self.database).await?;
                run_report_command(&service, cmd).await?;
            }

            Commands::Export {
                export_type,
                output,
            } => {
                let service = AgencyService::connect(&self.database).await?;
                run_export_command(&service, &export_type, output).await?;
            }

            Commands::Check => {
                let service = AgencyService::connect(&self.database).await?;
                let stats = service.check_integrity().await?;
                println!("Applicants:            {}", stats.applicant_count);
                println!("Ledger entries:        {}", stats.transaction_count);
                println!(
                    "Sequence gaps:         {}",
                    if stats.has_sequence_gaps { "YES" } else { "no" }
                );
                println!("Balance drift rows:    {}", stats.balance_drift_count);
                println!("Over-used vouchers:    {}", stats.voucher_overuse_count);
                println!("Orphan tickets:        {}", stats.orphan_ticket_count);

                if stats.has_sequence_gaps
                    || stats.balance_drift_count > 0
                    || stats.voucher_overuse_count > 0
                    || stats.orphan_ticket_count > 0
                {
                    anyhow::bail!("Integrity check FAILED");
                }
                println!("Integrity check passed");
            }
        }

        Ok(())
    }
}

async fn run_applicant_command(service: &AgencyService, cmd: ApplicantCommands) -> Result<()> {
    match cmd {
        ApplicantCommands::Register {
            name,
            phone,
            transport,
            from,
            exam_location,
            promo,
            discount,
            deposit,
            location,
        } => {
            let transport = TransportSelection::from_str(&transport)
                .with_context(|| format!("Invalid transport selection '{}'", transport))?;
            let manual_discount = discount.map(|d| parse_money(&d)).transpose()?;

            let result = service
                .register_applicant(RegisterApplicant {
                    full_name: name,
                    phone,
                    transport: Some(transport),
                    origin_location: from,
                    exam_location,
                    promo_code: promo,
                    manual_discount,
                    deposit: parse_money(&deposit)?,
                    till_location: location,
                })
                .await?;

            println!(
                "Registered {} (code {})",
                result.applicant.full_name, result.applicant.code
            );
            print_quote_lines(&result.quote);
        }

        ApplicantCommands::Show { code } => {
            let applicant = service.get_applicant_by_code(&code).await?;
            println!("{}  {}", applicant.code, applicant.full_name);
            println!("  status:    {}", applicant.status);
            println!("  total:     {}", format_amount(applicant.total_amount));
            println!("  paid:      {}", format_amount(applicant.amount_paid));
            println!("  discount:  {}", format_amount(applicant.discount_applied));
            println!(
                "  remaining: {}",
                format_amount(applicant.remaining_balance)
            );
            if let Some(exam_at) = applicant.exam_at {
                println!(
                    "  exam:      {} at {}",
                    exam_at.format("%Y-%m-%d %H:%M"),
                    applicant.exam_location.as_deref().unwrap_or("?")
                );
            }
        }

        ApplicantCommands::List => {
            for applicant in service.list_applicants().await? {
                println!(
                    "{}  {:24}  {:20}  remaining {}",
                    applicant.code,
                    applicant.full_name,
                    applicant.status.to_string(),
                    format_amount(applicant.remaining_balance)
                );
            }
        }

        ApplicantCommands::Pay {
            code,
            amount,
            location,
            description,
        } => {
            let applicant = service.get_applicant_by_code(&code).await?;
            let entry = service
                .record_payment(applicant.id, parse_money(&amount)?, location, description)
                .await?;
            let updated = service.get_applicant(applicant.id).await?;
            println!(
                "Recorded payment {} from {} (remaining {})",
                format_amount(entry.amount),
                updated.code,
                format_amount(updated.remaining_balance)
            );
        }

        ApplicantCommands::ScheduleExam {
            code,
            date,
            time,
            location,
        } => {
            let applicant = service.get_applicant_by_code(&code).await?;
            let exam_at = parse_date_time(&date, &time)?;
            service.schedule_exam(applicant.id, exam_at, &location).await?;
            println!(
                "Exam scheduled for {}: {} at {}",
                code,
                exam_at.format("%Y-%m-%d %H:%M"),
                location
            );
        }

        ApplicantCommands::Attended { code } => {
            let applicant = service.get_applicant_by_code(&code).await?;
            service.mark_attended(applicant.id).await?;
            println!("{} marked as attended", code);
        }

        ApplicantCommands::Absent { code } => {
            let applicant = service.get_applicant_by_code(&code).await?;
            service.mark_absent(applicant.id).await?;
            println!("{} marked as absent", code);
        }

        ApplicantCommands::Result { code, outcome } => {
            let passed = match outcome.to_lowercase().as_str() {
                "pass" | "passed" => true,
                "fail" | "failed" => false,
                other => anyhow::bail!("Invalid outcome '{}' (use pass or fail)", other),
            };
            let applicant = service.get_applicant_by_code(&code).await?;
            service.record_exam_result(applicant.id, passed).await?;
            println!("{} marked as {}", code, if passed { "passed" } else { "failed" });
        }

        ApplicantCommands::UndoResult { code } => {
            let applicant = service.get_applicant_by_code(&code).await?;
            service.undo_exam_result(applicant.id).await?;
            println!("Result undone for {}", code);
        }

        ApplicantCommands::Retake {
            code,
            date,
            time,
            location,
            voucher,
        } => {
            let applicant = service.get_applicant_by_code(&code).await?;
            let exam_at = parse_date_time(&date, &time)?;
            let voucher_id = voucher
                .map(|v| Uuid::parse_str(&v))
                .transpose()
                .context("Invalid voucher ID format (expected UUID)")?;

            let result = service
                .commit_retake(applicant.id, voucher_id, exam_at, &location)
                .await?;
            println!(
                "Retake scheduled for {}: fee {} (remaining {})",
                code,
                format_amount(result.quote.total),
                format_amount(result.applicant.remaining_balance)
            );
        }
    }
    Ok(())
}

async fn run_ticket_command(service: &AgencyService, cmd: TicketCommands) -> Result<()> {
    match cmd {
        TicketCommands::Issue {
            code,
            from,
            to,
            trip,
            date,
            time,
            voucher,
        } => {
            let applicant = service.get_applicant_by_code(&code).await?;
            let trip_type = TripType::from_str(&trip)
                .with_context(|| format!("Invalid trip type '{}'", trip))?;
            let departure_at = parse_date_time(&date, &time)?;
            let voucher_ids = voucher
                .iter()
                .map(|v| Uuid::parse_str(v))
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("Invalid voucher ID format (expected UUID)")?;

            let result = service
                .issue_ticket(
                    applicant.id,
                    &from,
                    &to,
                    trip_type,
                    departure_at,
                    &voucher_ids,
                )
                .await?;
            println!(
                "Issued ticket {} {} -> {} ({})",
                result.ticket.id, from, to, trip_type
            );
            println!(
                "  fare {}  credit {}  payable {}",
                format_amount(result.quote.transport),
                format_amount(result.quote.discount),
                format_amount(result.quote.total)
            );
        }

        TicketCommands::Modify {
            id,
            from,
            to,
            trip,
            date,
            time,
        } => {
            let ticket_id = parse_ticket_id(&id)?;
            let trip_type = TripType::from_str(&trip)
                .with_context(|| format!("Invalid trip type '{}'", trip))?;
            let new_departure = match (date, time) {
                (Some(date), Some(time)) => Some(parse_date_time(&date, &time)?),
                (None, None) => None,
                _ => anyhow::bail!("--date and --time must be given together"),
            };

            let result = service
                .modify_ticket(ticket_id, &from, &to, trip_type, new_departure)
                .await?;
            println!(
                "Modified ticket {}: fee {} diff {} -> balance delta {}",
                result.ticket.id,
                format_amount(result.quote.fee),
                format_amount(result.quote.price_diff),
                format_amount(result.quote.total)
            );
        }

        TicketCommands::Cancel { id } => {
            let result = service.cancel_ticket(parse_ticket_id(&id)?).await?;
            println!(
                "Cancelled ticket {} (fee {})",
                result.ticket.id,
                format_amount(result.quote.fee)
            );
            match result.compensation {
                Some(voucher) => println!(
                    "Compensation voucher {} issued: {}",
                    voucher.id,
                    format_amount(result.quote.compensation)
                ),
                None => println!("No compensation due"),
            }
        }

        TicketCommands::Used { id } => {
            service.mark_ticket_used(parse_ticket_id(&id)?).await?;
            println!("Ticket {} marked as used", id);
        }

        TicketCommands::NoShow { id } => {
            service.mark_ticket_no_show(parse_ticket_id(&id)?).await?;
            println!("Ticket {} marked as no-show", id);
        }

        TicketCommands::List { code } => {
            let applicant = service.get_applicant_by_code(&code).await?;
            for ticket in service.list_tickets_for_applicant(applicant.id).await? {
                println!(
                    "{}  {} -> {}  {}  {}  fare {}  {}",
                    ticket.id,
                    ticket.from_location,
                    ticket.to_location,
                    ticket.trip_type,
                    ticket.departure_at.format("%Y-%m-%d %H:%M"),
                    format_amount(ticket.fare),
                    ticket.status
                );
            }
        }
    }
    Ok(())
}

async fn run_route_command(service: &AgencyService, cmd: RouteCommands) -> Result<()> {
    match cmd {
        RouteCommands::Add {
            from,
            to,
            one_way,
            round_trip,
            departure,
            arrival,
        } => {
            let mut route =
                TransportRoute::new(from, to, parse_money(&one_way)?, parse_money(&round_trip)?);
            if let (Some(dep), Some(arr)) = (departure, arrival) {
                route = route.with_times(parse_time(&dep)?, parse_time(&arr)?);
            }
            service.add_route(&route).await?;
            println!(
                "Added route {} -> {} (one-way {}, round-trip {})",
                route.from_location,
                route.to_location,
                format_amount(route.one_way_price),
                format_amount(route.round_trip_price)
            );
        }

        RouteCommands::List => {
            for route in service.list_routes().await? {
                println!(
                    "{} -> {}  one-way {}  round-trip {}",
                    route.from_location,
                    route.to_location,
                    format_amount(route.one_way_price),
                    format_amount(route.round_trip_price)
                );
            }
        }
    }
    Ok(())
}

async fn run_policy_command(service: &AgencyService, cmd: PolicyCommands) -> Result<()> {
    match cmd {
        PolicyCommands::Add {
            name,
            category,
            hours,
            condition,
            fee,
        } => {
            let category = PolicyCategory::from_str(&category)
                .with_context(|| format!("Invalid policy category '{}'", category))?;
            let condition = condition
                .map(|c| {
                    TriggerCondition::from_str(&c)
                        .with_context(|| format!("Invalid condition '{}'", c))
                })
                .transpose()?;

            let policy =
                CancellationPolicy::new(name, category, hours, condition, parse_money(&fee)?);
            service.add_policy(&policy).await?;
            println!("Added policy '{}' ({})", policy.name, policy.category);
        }

        PolicyCommands::List => {
            for policy in service.list_policies().await? {
                let window = match (policy.hours_trigger, policy.condition) {
                    (Some(hours), Some(TriggerCondition::GreaterThan)) => {
                        format!(">= {}h before", hours)
                    }
                    (Some(hours), _) => format!("< {}h before", hours),
                    (None, _) => "default".to_string(),
                };
                println!(
                    "{:14} {:24} {:16} fee {}",
                    policy.category.to_string(),
                    policy.name,
                    window,
                    format_amount(policy.fee)
                );
            }
        }
    }
    Ok(())
}

async fn run_voucher_command(service: &AgencyService, cmd: VoucherCommands) -> Result<()> {
    match cmd {
        VoucherCommands::Promo {
            code,
            percent,
            max_uses,
            expires,
        } => {
            let expires_at = expires.map(|d| parse_date(&d)).transpose()?;
            let voucher = service
                .create_promo_code(&code, percent, max_uses, expires_at)
                .await?;
            println!(
                "Created promo {} ({}% off, {} uses)",
                code, percent, voucher.max_uses
            );
        }

        VoucherCommands::Grant {
            code,
            scope,
            percent,
            credit,
        } => {
            let applicant = service.get_applicant_by_code(&code).await?;
            let scope = VoucherScope::from_str(&scope)
                .with_context(|| format!("Invalid voucher scope '{}'", scope))?;

            let value = match (percent, credit) {
                (Some(_), Some(_)) => {
                    anyhow::bail!("--percent and --credit are mutually exclusive")
                }
                (None, Some(credit)) => VoucherValue::Credit(parse_money(&credit)?),
                (Some(p), None) => VoucherValue::Percent(p),
                // Grants default to a full waiver.
                (None, None) => VoucherValue::Percent(100),
            };

            let voucher = service.grant_voucher(applicant.id, scope, value).await?;
            println!("Granted voucher {} to {}", voucher.id, code);
        }

        VoucherCommands::List { applicant } => {
            let vouchers = match applicant {
                Some(code) => {
                    let applicant = service.get_applicant_by_code(&code).await?;
                    service.list_vouchers_for_applicant(applicant.id).await?
                }
                None => service.list_vouchers().await?,
            };
            for voucher in vouchers {
                let value = match voucher.value {
                    VoucherValue::Percent(p) => format!("{}%", p),
                    VoucherValue::Credit(balance) => format_amount(balance),
                };
                println!(
                    "{}  {:12} {:12} {:10} uses {}/{}  {}",
                    voucher.id,
                    voucher.category.to_string(),
                    voucher.scope.to_string(),
                    value,
                    voucher.usage_count,
                    voucher.max_uses,
                    if voucher.is_used { "used" } else { "active" }
                );
            }
        }
    }
    Ok(())
}

async fn run_report_command(service: &AgencyService, cmd: ReportCommands) -> Result<()> {
    match cmd {
        ReportCommands::Ledger { from, to } => {
            let report = service
                .ledger_report(parse_date(&from)?, parse_date(&to)?)
                .await?;
            println!(
                "Ledger {} .. {}",
                report.from_date.format("%Y-%m-%d"),
                report.to_date.format("%Y-%m-%d")
            );
            println!("  income:  {}", format_amount(report.total_income));
            println!("  outflow: {}", format_amount(report.total_outflow));
            println!("  net:     {}", format_amount(report.net));
            for kind in &report.by_kind {
                println!(
                    "  {:12} {:4} entries  {}",
                    kind.kind,
                    kind.count,
                    format_amount(kind.total)
                );
            }
            for loc in &report.by_location {
                let name = if loc.location.is_empty() {
                    "(unassigned)"
                } else {
                    &loc.location
                };
                println!("  {:16} net {}", name, format_amount(loc.net));
            }
        }

        ReportCommands::Outstanding => {
            let report = service.outstanding_report().await?;
            println!(
                "Outstanding total: {}",
                format_amount(report.total_outstanding)
            );
            for entry in &report.entries {
                println!(
                    "{}  {:24} {:20} {}",
                    entry.code,
                    entry.full_name,
                    entry.status.to_string(),
                    format_amount(entry.remaining_balance)
                );
            }
        }

        ReportCommands::Manifest { from, to, date } => {
            let day_start = parse_date(&date)?;
            let day_end = day_start + Duration::days(1);
            let exporter = Exporter::new(service);
            let count = exporter
                .export_manifest_csv(std::io::stdout(), &from, &to, day_start, day_end)
                .await?;
            eprintln!("{} passengers", count);
        }
    }
    Ok(())
}

async fn run_export_command(
    service: &AgencyService,
    export_type: &str,
    output: Option<String>,
) -> Result<()> {
    let exporter = Exporter::new(service);

    let writer: Box<dyn std::io::Write> = match &output {
        Some(path) => Box::new(std::fs::File::create(path)?),
        None => Box::new(std::io::stdout()),
    };

    let count = match export_type {
        "transactions" => exporter.export_transactions_csv(writer).await?,
        "applicants" => exporter.export_applicants_csv(writer).await?,
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            snapshot.applicants.len() + snapshot.transactions.len()
        }
        other => anyhow::bail!(
            "Unknown export type '{}' (use transactions, applicants or full)",
            other
        ),
    };

    if let Some(path) = output {
        eprintln!("Exported {} records to {}", count, path);
    }
    Ok(())
}

fn print_quote_lines(quote: &crate::domain::Quote) {
    println!("  base:      {}", format_amount(quote.base));
    if quote.transport > 0 {
        println!("  transport: {}", format_amount(quote.transport));
    }
    if quote.discount > 0 {
        println!("  discount:  {}", format_amount(quote.discount));
    }
    println!("  total:     {}", format_amount(quote.total));
    println!("  remaining: {}", format_amount(quote.remaining));
}

fn parse_money(input: &str) -> Result<Amount> {
    parse_amount(input).with_context(|| format!("Invalid amount '{}'", input))
}

fn parse_date(input: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD", input))?;
    Ok(date.and_hms_opt(0, 0, 0).unwrap().and_utc())
}

fn parse_time(input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input, "%H:%M")
        .with_context(|| format!("Invalid time '{}'. Use HH:MM", input))
}

fn parse_date_time(date: &str, time: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD", date))?;
    let time = parse_time(time)?;
    Ok(date.and_time(time).and_utc())
}

fn parse_ticket_id(input: &str) -> Result<Uuid> {
    Uuid::parse_str(input).context("Invalid ticket ID format (expected UUID)")
}
