use std::{
    error::Error,
    io::{self, BufRead, Write},
    path::PathBuf,
    process::exit,
    sync::Arc,
};

use clap::{Parser, Subcommand, ValueEnum};
use time::OffsetDateTime;

use budget_tracker::{
    App, BudgetStatus, Category, CategoryFilter, CloudServices, Expense, ExpenseChanges, ExpenseId,
    NewExpense, RecordStore,
    auth::AuthManager,
    budget::parse_budget,
    cloud::{CloudClient, FederatedCredential, FederatedProvider},
    config::{CLOUD_URL_ENV, ClientConfig, DATA_DIR_ENV, LOG_ENV},
    currency::format_currency,
    expense::parse_amount,
    export::expenses_to_csv,
    logging::init_logging,
    record::parse_date,
    storage::{LocalStore, MigrationOutcome, MigrationSummary},
};

/// Track a budget and expenses on this device or in the cloud.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// The directory holding the local database.
    #[arg(long, env = DATA_DIR_ENV, global = true)]
    data_dir: Option<PathBuf>,

    /// The URL of the cloud platform. Without it everything stays on this device.
    #[arg(long, env = CLOUD_URL_ENV, global = true)]
    cloud_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show or set the budget.
    Budget {
        #[command(subcommand)]
        command: BudgetCommand,
    },
    /// Add, edit, remove and list expenses.
    Expense {
        #[command(subcommand)]
        command: ExpenseCommand,
    },
    /// Show the budget, spending and spending per category.
    Summary,
    /// Write the record to stdout or a file.
    Export {
        /// The output format.
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace the record with one exported as JSON.
    Import {
        /// The JSON file to import.
        file: PathBuf,
    },
    /// Delete the budget and every expense.
    Clear {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage the cloud account.
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },
    /// Copy the data on this device to the signed-in account.
    Migrate {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the summary whenever the cloud record changes.
    Watch,
}

#[derive(Subcommand, Debug)]
enum BudgetCommand {
    /// Show the budget and what remains of it.
    Show,
    /// Set the budget, e.g. `budget set 2500`.
    Set {
        /// The new budget. Anything that is not a non-negative number sets it to zero.
        amount: String,
    },
}

#[derive(Subcommand, Debug)]
enum ExpenseCommand {
    /// Add an expense.
    Add {
        /// What the money was spent on.
        description: String,
        /// How much was spent.
        amount: String,
        /// One of food, transport, bills, shopping, entertainment, health,
        /// education or other.
        #[arg(short, long, default_value = "other")]
        category: Category,
        /// The day of the spend as YYYY-MM-DD, today if not given.
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Change an expense.
    Edit {
        /// The ID of the expense.
        id: String,
        /// The new description.
        #[arg(long)]
        description: Option<String>,
        /// The new amount.
        #[arg(long)]
        amount: Option<String>,
        /// The new category.
        #[arg(long)]
        category: Option<Category>,
        /// The new date as YYYY-MM-DD.
        #[arg(long)]
        date: Option<String>,
    },
    /// Delete an expense.
    Remove {
        /// The ID of the expense.
        id: String,
    },
    /// List expenses in the order they were added.
    List {
        /// A category, or "all".
        #[arg(short, long, default_value = CategoryFilter::ALL_SENTINEL)]
        category: CategoryFilter,
    },
    /// List the latest expenses.
    Recent {
        /// How many expenses to list.
        #[arg(default_value_t = 5)]
        count: usize,
    },
    /// List the expenses between two dates, inclusive.
    Range {
        /// The first day as YYYY-MM-DD.
        start: String,
        /// The last day as YYYY-MM-DD.
        end: String,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Register a new account and sign in.
    SignUp {
        /// The account email address.
        email: String,
    },
    /// Sign in with an email and password.
    SignIn {
        /// The account email address.
        email: String,
    },
    /// Sign in with a third-party identity.
    SignInWith {
        /// Either google or github.
        provider: FederatedProvider,
        /// The email address the provider vouches for, asked for if not given.
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign out. The data on this device is kept.
    SignOut,
    /// Send a password reset message.
    ResetPassword {
        /// The account email address.
        email: String,
    },
    /// Show who is signed in and where the data is kept.
    Status,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ExportFormat {
    /// The full record as JSON, can be imported again.
    Json,
    /// The expenses as CSV.
    Csv,
}

#[tokio::main]
async fn main() {
    init_logging(LOG_ENV, "warn");

    let cli = Cli::parse();

    if let Err(error) = run(cli).await {
        print_error(error);
        exit(1);
    }
}

type CliResult = Result<(), Box<dyn Error>>;

async fn run(cli: Cli) -> CliResult {
    let config = ClientConfig::new(cli.data_dir, cli.cloud_url)?;
    let items = config.open_local_items()?;

    let cloud = config.cloud_url.as_deref().map(|url| {
        let client = CloudClient::new(url);

        CloudServices {
            auth: AuthManager::new(Arc::new(client.clone())).with_session_cache(items.clone()),
            documents: Arc::new(client),
        }
    });

    let mut app = App::new(LocalStore::new(items), cloud);

    match cli.command {
        Command::Budget { command } => budget_command(&app, command).await,
        Command::Expense { command } => expense_command(&app, command).await,
        Command::Summary => {
            print_summary(&app).await;
            Ok(())
        }
        Command::Export { format, output } => export(&app, format, output).await,
        Command::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .map_err(|error| format!("could not read {}: {error}", file.display()))?;
            let record = app.storage().import_from_text(&text).await?;
            println!(
                "Imported a budget of {} and {} expenses into {}.",
                format_currency(record.budget),
                record.expenses.len(),
                app.backend()
            );
            Ok(())
        }
        Command::Clear { yes } => {
            if yes || confirm(&format!("Delete every expense and the budget in {}?", app.backend()))? {
                app.storage().clear().await?;
                println!("Cleared the data in {}.", app.backend());
            }
            Ok(())
        }
        Command::Account { command } => account_command(&mut app, command).await,
        Command::Migrate { yes } => migrate(&app, yes).await,
        Command::Watch => watch(&app).await,
    }
}

async fn budget_command(app: &App, command: BudgetCommand) -> CliResult {
    match command {
        BudgetCommand::Show => {
            let budget = app.budget().get_budget().await;
            let remaining = app.budget().get_remaining().await;
            println!("Budget:    {}", format_currency(budget));
            println!("Remaining: {}", format_currency(remaining));
        }
        BudgetCommand::Set { amount } => {
            let budget = app.budget().set_budget(parse_budget(&amount)).await?;
            println!("Budget set to {}.", format_currency(budget));
        }
    }

    Ok(())
}

async fn expense_command(app: &App, command: ExpenseCommand) -> CliResult {
    let expenses = app.expenses();

    match command {
        ExpenseCommand::Add {
            description,
            amount,
            category,
            date,
        } => {
            let date = match date {
                Some(date) => parse_date(&date)?,
                None => today(),
            };
            let expense = expenses
                .add(NewExpense {
                    description,
                    amount: parse_amount(&amount)?,
                    category,
                    date,
                })
                .await?;
            println!("Added expense {}.", expense.id);
        }
        ExpenseCommand::Edit {
            id,
            description,
            amount,
            category,
            date,
        } => {
            let changes = ExpenseChanges {
                description,
                amount: amount.as_deref().map(parse_amount).transpose()?,
                category,
                date: date.as_deref().map(parse_date).transpose()?,
            };
            if changes.is_empty() {
                return Err("nothing to change, pass at least one of --description, --amount, --category or --date".into());
            }

            match expenses.update(&ExpenseId::new(id.clone()), changes).await? {
                Some(expense) => print_expenses(&[expense]),
                None => return Err(format!("there is no expense with the ID {id}").into()),
            }
        }
        ExpenseCommand::Remove { id } => {
            if !expenses.remove(&ExpenseId::new(id.clone())).await? {
                return Err(format!("there is no expense with the ID {id}").into());
            }
            println!("Removed expense {id}.");
        }
        ExpenseCommand::List { category } => print_expenses(&expenses.list(category).await),
        ExpenseCommand::Recent { count } => print_expenses(&expenses.recent(count).await),
        ExpenseCommand::Range { start, end } => {
            let (start, end) = (parse_date(&start)?, parse_date(&end)?);
            print_expenses(&expenses.by_date_range(start, end).await);
        }
    }

    Ok(())
}

async fn export(app: &App, format: ExportFormat, output: Option<PathBuf>) -> CliResult {
    let text = match format {
        ExportFormat::Json => app.storage().export_as_text().await?,
        ExportFormat::Csv => expenses_to_csv(&app.storage().read().await.expenses)?,
    };

    match output {
        Some(path) => {
            std::fs::write(&path, text)
                .map_err(|error| format!("could not write {}: {error}", path.display()))?;
            println!("Exported to {}.", path.display());
        }
        None => println!("{text}"),
    }

    Ok(())
}

async fn account_command(app: &mut App, command: AccountCommand) -> CliResult {
    let auth = app.auth().cloned().ok_or_else(|| {
        format!("no cloud platform is configured, set {CLOUD_URL_ENV} or pass --cloud-url")
    })?;

    match command {
        AccountCommand::SignUp { email } => {
            let password = prompt_new_password()?;
            let user = auth.sign_up(&email, &password).await?;
            println!("Signed up and signed in as {}.", user.email);
        }
        AccountCommand::SignIn { email } => {
            let password = rpassword::prompt_password("Password: ")?;
            let user = auth.sign_in(&email, &password).await?;
            println!("Signed in as {}.", user.email);
        }
        AccountCommand::SignInWith { provider, email } => {
            let email = match email {
                Some(email) => Some(email),
                None => prompt_line(&format!(
                    "Email to sign in with {provider:?} (leave blank to cancel): "
                ))?,
            };
            let credential = match email {
                Some(email) if !email.trim().is_empty() => FederatedCredential::Assertion { email },
                _ => FederatedCredential::Cancelled,
            };
            let user = auth
                .sign_in_with_federated_provider(provider, credential)
                .await?;
            println!("Signed in as {}.", user.email);
        }
        AccountCommand::SignOut => {
            auth.sign_out().await?;
            println!("Signed out. The data on this device has been kept.");
        }
        AccountCommand::ResetPassword { email } => {
            auth.reset_password(&email).await?;
            println!("A password reset message has been sent to {email}.");
            return Ok(());
        }
        AccountCommand::Status => {}
    }

    app.sync_auth_state();

    match auth.current_user() {
        Some(user) => println!("Signed in as {} via {}.", user.email, user.provider.as_str()),
        None => println!("Not signed in."),
    }
    println!("Your data is kept in {}.", app.backend());

    if let Some(record) = app.pending_migration().await {
        println!(
            "This device holds {} expenses that are not in the cloud, run `budget migrate` to copy them.",
            record.expenses.len()
        );
    }

    Ok(())
}

async fn migrate(app: &App, yes: bool) -> CliResult {
    if app.pending_migration().await.is_none() && app.storage().as_remote().is_some() {
        println!("There is nothing on this device to migrate.");
        return Ok(());
    }

    let outcome = app
        .migrate_local_data(|summary| yes || confirm_migration(summary))
        .await?;

    match outcome {
        MigrationOutcome::Migrated => println!("Copied the data on this device to the cloud."),
        MigrationOutcome::Declined => println!("Nothing was copied."),
        MigrationOutcome::NothingToMigrate => {
            println!("There is nothing on this device to migrate.")
        }
    }

    Ok(())
}

fn confirm_migration(summary: &MigrationSummary) -> bool {
    println!(
        "This device holds a budget of {} and {} expenses.",
        format_currency(summary.budget),
        summary.expense_count
    );
    if summary.remote_has_data {
        println!("The budget and expenses in the cloud will be replaced.");
    }

    confirm("Copy them to the cloud?").unwrap_or_else(|error| {
        print_error(error);
        false
    })
}

async fn watch(app: &App) -> CliResult {
    let subscription = app
        .watch(|record| {
            let remaining = record.budget - record.total_spent();
            println!(
                "[{}] budget {}, spent {}, remaining {}, {} expenses",
                now_time(),
                format_currency(record.budget),
                format_currency(record.total_spent()),
                format_currency(remaining),
                record.expenses.len()
            );
        })
        .await?;

    println!("Watching for changes, press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    subscription.cancel();

    Ok(())
}

async fn print_summary(app: &App) {
    let summary = app.budget().summary().await;
    let statistics = app.expenses().statistics_by_category().await;
    let average = app.expenses().average_daily_spend().await;

    println!("Budget:     {}", format_currency(summary.budget));
    println!("Spent:      {}", format_currency(summary.spent));
    println!("Remaining:  {}", format_currency(summary.remaining));
    if summary.status != BudgetStatus::NoBudget {
        println!("Used:       {}%", summary.percent_used);
    }
    println!("Status:     {}", status_label(summary.status));
    println!("Daily avg:  {}", format_currency(average));

    if !statistics.is_empty() {
        println!();
        for (category, statistics) in statistics {
            println!(
                "{:<18} {:>14} {:>4} {:>6}%",
                category.label(),
                format_currency(statistics.total),
                statistics.count,
                statistics.percentage
            );
        }
    }

    println!();
    println!("Data kept in {}.", app.backend());
}

fn status_label(status: BudgetStatus) -> &'static str {
    match status {
        BudgetStatus::NoBudget => "no budget set",
        BudgetStatus::OnTrack => "on track",
        BudgetStatus::NearLimit => "nearing the limit",
        BudgetStatus::OverBudget => "over budget",
    }
}

fn print_expenses(expenses: &[Expense]) {
    if expenses.is_empty() {
        println!("No expenses.");
        return;
    }

    for expense in expenses {
        println!(
            "{:<18} {} {:<13} {:>12}  {}",
            expense.id,
            expense.date,
            expense.category,
            format_currency(expense.amount),
            expense.description
        );
    }
}

fn today() -> time::Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

fn now_time() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());

    format!("{:02}:{:02}:{:02}", now.hour(), now.minute(), now.second())
}

fn prompt_new_password() -> io::Result<String> {
    loop {
        let first_password = rpassword::prompt_password("Choose a password: ")?;
        let second_password = rpassword::prompt_password("Enter the same password again: ")?;

        if first_password == second_password {
            return Ok(first_password);
        }

        print_error("Passwords must match, try again.");
    }
}

/// Read a line from stdin, `None` at the end of input.
fn prompt_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }

    Ok(Some(line.trim().to_owned()))
}

fn confirm(question: &str) -> io::Result<bool> {
    let answer = prompt_line(&format!("{question} [y/N] "))?;

    Ok(answer.is_some_and(|answer| answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")))
}

fn print_error(error: impl ToString) {
    eprintln!(
        "\x1b[31;1m{}\x1b[0m",
        capitalise_first_char(&error.to_string())
    )
}

fn capitalise_first_char(string: &str) -> String {
    let mut chars = string.chars();
    let Some(first) = chars.next() else {
        return String::with_capacity(0);
    };
    first.to_uppercase().chain(chars).collect()
}
