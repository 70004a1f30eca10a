use std::{error::Error, path::PathBuf, process::ExitCode, time::Duration};

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use engine::{
    CategoryKind, Engine, EngineError, Frequency, LoanStatus, MoneyCents, MutationRequest,
    NewTransaction, OverpaymentDecision, Recurrence, Session, Transaction, TransactionFilter,
    TransactionKind, TransactionPatch,
};
use migration::{Migrator, MigratorTrait};
use settings::{Database, Settings};

mod settings;

type AppResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "famledger")]
#[command(about = "Household ledger with loans, balance snapshots and undo")]
struct Cli {
    /// Settings file; `famledger.toml` is read when present.
    #[arg(long, env = "FAMLEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Password for sealed storage and sealed checkpoints.
    #[arg(long, env = "FAMLEDGER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Name recorded with every mutation.
    #[arg(long, env = "USER", default_value = "famledger")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a transaction.
    Add(AddArgs),
    /// Change fields of a transaction.
    Edit(EditArgs),
    /// List transactions, newest first.
    List(ListArgs),
    /// Delete transactions. Pending loans cannot be deleted.
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Mark a loan settled whatever its repayments.
    Settle { loan: i64 },
    /// Split an overpaying repayment into a repayment and a refund.
    Adjust { repayment: i64 },
    /// Pending loans with what is left to repay.
    Loans,
    Recur(Recur),
    /// Record a balance snapshot.
    Snapshot(SnapshotArgs),
    /// Cached balance of every account.
    Balances {
        /// Compute the total as of this date instead.
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Income, expense and loan totals over a date range.
    Summary { from: NaiveDate, to: NaiveDate },
    Account(AccountCmd),
    Category(CategoryCmd),
    Budget(BudgetCmd),
    /// Rebuild balances, snapshots and loan statuses from scratch.
    Recompute,
    /// Restore the state before the last change.
    Undo,
    /// Drop undo checkpoints older than the retention.
    Purge {
        /// Override the configured retention.
        #[arg(long)]
        hours: Option<u64>,
    },
    /// Write the whole ledger to a sealed file.
    Export { path: PathBuf },
    /// Replace the ledger with a sealed file.
    Import { path: PathBuf },
    /// Number of applied migrations.
    Version,
}

impl Command {
    fn mutates(&self) -> bool {
        match self {
            Self::Add(_)
            | Self::Edit(_)
            | Self::Delete { .. }
            | Self::Settle { .. }
            | Self::Adjust { .. }
            | Self::Snapshot(_)
            | Self::Recompute
            | Self::Undo
            | Self::Import { .. } => true,
            Self::Recur(recur) => !matches!(recur.command, RecurCommand::Due),
            Self::Account(cmd) => !matches!(cmd.command, AccountCommand::List),
            Self::Category(cmd) => !matches!(cmd.command, CategoryCommand::List { .. }),
            Self::Budget(cmd) => matches!(
                cmd.command,
                BudgetCommand::Set { .. } | BudgetCommand::Remove { .. }
            ),
            Self::List(_)
            | Self::Loans
            | Self::Balances { .. }
            | Self::Summary { .. }
            | Self::Purge { .. }
            | Self::Export { .. }
            | Self::Version => false,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Income,
    Expense,
    Loan,
    Repayment,
}

impl From<KindArg> for TransactionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Income => Self::Income,
            KindArg::Expense => Self::Expense,
            KindArg::Loan => Self::Loan,
            KindArg::Repayment => Self::Repayment,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FrequencyArg {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl From<FrequencyArg> for Frequency {
    fn from(frequency: FrequencyArg) -> Self {
        match frequency {
            FrequencyArg::Daily => Self::Daily,
            FrequencyArg::Weekly => Self::Weekly,
            FrequencyArg::Monthly => Self::Monthly,
            FrequencyArg::Yearly => Self::Yearly,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CategoryKindArg {
    Income,
    Expense,
}

impl From<CategoryKindArg> for CategoryKind {
    fn from(kind: CategoryKindArg) -> Self {
        match kind {
            CategoryKindArg::Income => Self::Income,
            CategoryKindArg::Expense => Self::Expense,
        }
    }
}

fn recurrence(every: Option<FrequencyArg>, until: Option<NaiveDate>) -> Option<Recurrence> {
    every.map(|frequency| {
        let recurrence = Recurrence::new(frequency.into());
        match until {
            Some(end) => recurrence.until(end),
            None => recurrence,
        }
    })
}

#[derive(Args, Debug)]
struct AddArgs {
    #[arg(value_enum)]
    kind: KindArg,
    /// Amount such as `12.50` or `12,50`.
    amount: MoneyCents,
    /// Effective date (default: today).
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    category: Option<i64>,
    #[arg(long)]
    account: Option<i64>,
    #[arg(long, default_value = "")]
    description: String,
    /// Loan repaid by a repayment.
    #[arg(long)]
    loan: Option<i64>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Make the transaction a recurring template.
    #[arg(long, value_enum)]
    every: Option<FrequencyArg>,
    /// Last date a recurrence may fire on.
    #[arg(long, requires = "every")]
    until: Option<NaiveDate>,
    /// On overpayment, record what is left on the loan plus a refund income.
    #[arg(long)]
    split: bool,
}

impl AddArgs {
    fn into_request(self, today: NaiveDate) -> MutationRequest {
        let tx = NewTransaction {
            kind: self.kind.into(),
            amount: self.amount,
            category_id: self.category,
            description: self.description,
            effective_date: self.date.unwrap_or(today),
            account_id: self.account,
            related_id: self.loan,
            tags: self.tags.into_iter().collect(),
            recurrence: recurrence(self.every, self.until),
        };
        if self.split {
            MutationRequest::ResolveOverpayment {
                tx,
                decision: OverpaymentDecision::Split,
            }
        } else {
            MutationRequest::Add(tx)
        }
    }
}

#[derive(Args, Debug)]
struct EditArgs {
    id: i64,
    #[arg(long)]
    amount: Option<MoneyCents>,
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    category: Option<i64>,
    #[arg(long)]
    account: Option<i64>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    loan: Option<i64>,
    /// Replace the tags.
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long, value_enum, conflicts_with = "no_recurrence")]
    every: Option<FrequencyArg>,
    #[arg(long, requires = "every")]
    until: Option<NaiveDate>,
    /// Turn a recurring template into a plain transaction.
    #[arg(long)]
    no_recurrence: bool,
}

impl EditArgs {
    fn into_request(self) -> MutationRequest {
        let patch = TransactionPatch {
            amount: self.amount,
            category_id: self.category,
            description: self.description,
            effective_date: self.date,
            account_id: self.account,
            related_id: self.loan,
            tags: (!self.tags.is_empty()).then(|| self.tags.into_iter().collect()),
            recurrence: if self.no_recurrence {
                Some(None)
            } else {
                recurrence(self.every, self.until).map(Some)
            },
        };
        MutationRequest::Edit { id: self.id, patch }
    }
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(long)]
    from: Option<NaiveDate>,
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long, value_enum)]
    kind: Option<KindArg>,
    #[arg(long)]
    category: Option<i64>,
    #[arg(long)]
    account: Option<i64>,
    /// Only pending loans.
    #[arg(long)]
    pending: bool,
    /// Match description, category name or amount.
    #[arg(long)]
    text: Option<String>,
}

impl From<ListArgs> for TransactionFilter {
    fn from(args: ListArgs) -> Self {
        TransactionFilter {
            from: args.from,
            to: args.to,
            kind: args.kind.map(Into::into),
            category_id: args.category,
            account_id: args.account,
            status: args.pending.then_some(LoanStatus::Pending),
            text: args.text,
        }
    }
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    /// Snapshot one account; every account when omitted.
    #[arg(long)]
    account: Option<i64>,
    /// Default: today.
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Args, Debug)]
struct Recur {
    #[command(subcommand)]
    command: RecurCommand,
}

#[derive(Subcommand, Debug)]
enum RecurCommand {
    /// Emit the next occurrence of a template.
    Run { id: i64 },
    /// Stop a template from recurring.
    Stop { id: i64 },
    /// Templates with an occurrence due today or earlier.
    Due,
}

#[derive(Args, Debug)]
struct AccountCmd {
    #[command(subcommand)]
    command: AccountCommand,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    Create {
        name: String,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        id: i64,
    },
    List,
}

#[derive(Args, Debug)]
struct CategoryCmd {
    #[command(subcommand)]
    command: CategoryCommand,
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
    Create {
        name: String,
        #[arg(value_enum)]
        kind: CategoryKindArg,
    },
    Rename {
        id: i64,
        name: String,
    },
    Delete {
        id: i64,
    },
    List {
        #[arg(long, value_enum)]
        kind: Option<CategoryKindArg>,
    },
}

#[derive(Args, Debug)]
struct BudgetCmd {
    #[command(subcommand)]
    command: BudgetCommand,
}

#[derive(Subcommand, Debug)]
enum BudgetCommand {
    /// Set the budget of a category for the month containing `month`.
    Set {
        category: i64,
        month: NaiveDate,
        amount: MoneyCents,
    },
    Remove {
        category: i64,
        month: NaiveDate,
    },
    List {
        #[arg(long)]
        month: Option<NaiveDate>,
    },
    /// Budget against spending for one month.
    Report { month: NaiveDate },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match Settings::new(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("failed to load settings: {err}");
            return ExitCode::from(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "famledger={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    match run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, settings: Settings) -> AppResult<()> {
    let session = Session::now(cli.user.clone());
    let database = parse_database(&settings.database).await?;

    let mut builder = Engine::builder()
        .database(database)
        .history_capacity(settings.undo.capacity)
        .retention(Duration::from_secs(
            settings.undo.retention_hours.saturating_mul(3600),
        ));
    if let Some(dir) = &settings.undo.dir {
        builder = builder.checkpoint_dir(dir);
    }
    let sealed = match &settings.database {
        Database::Sealed(path) => Some(path.clone()),
        Database::Memory | Database::Sqlite(_) => None,
    };
    match &cli.password {
        Some(password) => builder = builder.password(password.clone()),
        None if sealed.is_some() => {
            return Err("sealed storage needs FAMLEDGER_PASSWORD".into());
        }
        None => {}
    }
    let engine = builder.build().await?;

    if let Some(path) = &sealed
        && path.exists()
    {
        engine.open_sealed(path).await?;
    }
    let purged = engine.purge_expired().await?;
    if purged > 0 {
        tracing::debug!(purged, "expired checkpoints dropped");
    }

    let mutates = cli.command.mutates();
    execute(&engine, &session, cli.password.as_deref(), cli.command).await?;

    if let Some(path) = &sealed
        && mutates
    {
        engine.export_sealed(path).await?;
    }
    Ok(())
}

async fn parse_database(config: &Database) -> AppResult<sea_orm::DatabaseConnection> {
    let url = match config {
        Database::Memory | Database::Sealed(_) => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{path}?mode=rwc"),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}

async fn execute(
    engine: &Engine,
    session: &Session,
    password: Option<&str>,
    command: Command,
) -> AppResult<()> {
    match command {
        Command::Add(args) => {
            let request = args.into_request(session.today);
            submit(engine, session, request).await?;
        }
        Command::Edit(args) => submit(engine, session, args.into_request()).await?,
        Command::Delete { ids } => {
            submit(engine, session, MutationRequest::Delete(ids)).await?;
        }
        Command::Settle { loan } => {
            submit(engine, session, MutationRequest::Settle(loan)).await?;
        }
        Command::Adjust { repayment } => {
            let request = MutationRequest::AdjustOverpayment(repayment);
            submit(engine, session, request).await?;
        }
        Command::List(args) => {
            for tx in engine.query(&args.into()).await? {
                println!("{}", format_transaction(&tx));
            }
        }
        Command::Loans => {
            for loan in engine.open_loans().await? {
                println!(
                    "{}  repaid {}  remaining {}",
                    format_transaction(&loan.loan),
                    loan.repaid,
                    loan.remaining
                );
            }
        }
        Command::Recur(recur) => match recur.command {
            RecurCommand::Run { id } => {
                submit(engine, session, MutationRequest::ExecuteRecurrence(id)).await?;
            }
            RecurCommand::Stop { id } => {
                submit(engine, session, MutationRequest::StopRecurrence(id)).await?;
            }
            RecurCommand::Due => {
                for (template, next) in engine.due_recurrences(session.today).await? {
                    println!("{next}  {}", format_transaction(&template));
                }
            }
        },
        Command::Snapshot(args) => {
            let request = MutationRequest::TakeSnapshot {
                account_id: args.account,
                date: args.date.unwrap_or(session.today),
                description: args.description,
            };
            submit(engine, session, request).await?;
        }
        Command::Balances { as_of: Some(date) } => {
            println!("total as of {date}: {}", engine.total_balance_as_of(date).await?);
        }
        Command::Balances { as_of: None } => {
            for account in engine.balances().await? {
                println!(
                    "#{:<4} {:<24} {:>12} {}",
                    account.id,
                    account.name,
                    account.balance,
                    account.currency.code()
                );
            }
            println!("total: {}", engine.total_balance().await?);
        }
        Command::Summary { from, to } => {
            let summary = engine.summary(from, to).await?;
            println!("income      {:>12}", summary.income);
            println!("expense     {:>12}", summary.expense);
            println!("loans       {:>12}", summary.loans);
            println!("repayments  {:>12}", summary.repayments);
            println!("net         {:>12}", summary.net);
        }
        Command::Account(cmd) => account(engine, session, cmd.command).await?,
        Command::Category(cmd) => category(engine, session, cmd.command).await?,
        Command::Budget(cmd) => budget(engine, session, cmd.command).await?,
        Command::Recompute => {
            let changed = engine.recompute_all(session).await?;
            println!("{} snapshots and loans updated", changed.len());
        }
        Command::Undo => match engine.undo(session).await {
            Ok(handle) => println!("restored state from {}", handle.taken_at),
            Err(EngineError::NothingToUndo) => println!("nothing to undo"),
            Err(err) => return Err(err.into()),
        },
        Command::Purge { hours } => {
            let removed = match hours {
                Some(hours) => {
                    let age = Duration::from_secs(hours.saturating_mul(3600));
                    engine.purge_older_than(age).await?
                }
                None => engine.purge_expired().await?,
            };
            println!("{removed} checkpoints removed");
        }
        Command::Export { path } => engine.export_sealed(&path).await?,
        Command::Import { path } => {
            let password = password.ok_or("import needs FAMLEDGER_PASSWORD")?;
            engine.import_sealed(session, &path, password).await?;
        }
        Command::Version => println!("schema version {}", engine.schema_version().await?),
    }
    Ok(())
}

async fn submit(engine: &Engine, session: &Session, request: MutationRequest) -> AppResult<()> {
    match engine.submit(session, request).await {
        Ok(view) => {
            for tx in &view.changed {
                println!("{}", format_transaction(tx));
            }
            for id in &view.removed {
                println!("#{id} removed");
            }
            println!("total: {}", view.total);
            Ok(())
        }
        Err(EngineError::OverpaymentDetected(over)) => Err(format!(
            "repayment of {} exceeds the {} left on loan #{}; \
             retry with --split to record a refund of {}",
            over.amount, over.remaining, over.loan_id, over.surplus
        )
        .into()),
        Err(err) => Err(err.into()),
    }
}

async fn account(engine: &Engine, session: &Session, command: AccountCommand) -> AppResult<()> {
    match command {
        AccountCommand::Create {
            name,
            currency,
            description,
        } => {
            let id = engine
                .create_account(session, &name, currency.as_deref(), description.as_deref())
                .await?;
            println!("account #{id} created");
        }
        AccountCommand::Update {
            id,
            name,
            currency,
            description,
        } => {
            let account = engine
                .update_account(
                    session,
                    id,
                    name.as_deref(),
                    currency.as_deref(),
                    description.as_deref(),
                )
                .await?;
            println!("account #{} is now {}", account.id, account.name);
        }
        AccountCommand::Delete { id } => engine.delete_account(session, id).await?,
        AccountCommand::List => {
            for account in engine.accounts().await? {
                println!(
                    "#{:<4} {:<24} {} {}",
                    account.id,
                    account.name,
                    account.currency.code(),
                    account.description.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

async fn category(engine: &Engine, session: &Session, command: CategoryCommand) -> AppResult<()> {
    match command {
        CategoryCommand::Create { name, kind } => {
            let id = engine.create_category(session, &name, kind.into()).await?;
            println!("category #{id} created");
        }
        CategoryCommand::Rename { id, name } => {
            let category = engine.rename_category(session, id, &name).await?;
            println!("category #{} is now {}", category.id, category.name);
        }
        CategoryCommand::Delete { id } => engine.delete_category(session, id).await?,
        CategoryCommand::List { kind } => {
            for category in engine.categories(kind.map(Into::into)).await? {
                println!(
                    "#{:<4} {:<8} {}",
                    category.id,
                    category.kind.as_str(),
                    category.name
                );
            }
        }
    }
    Ok(())
}

async fn budget(engine: &Engine, session: &Session, command: BudgetCommand) -> AppResult<()> {
    match command {
        BudgetCommand::Set {
            category,
            month,
            amount,
        } => {
            let budget = engine.set_budget(session, category, month, amount).await?;
            println!("budget for #{} in {}: {}", category, budget.month, budget.amount);
        }
        BudgetCommand::Remove { category, month } => {
            engine.remove_budget(session, category, month).await?;
        }
        BudgetCommand::List { month } => {
            for budget in engine.budgets(month).await? {
                println!(
                    "{} #{:<4} {:>12}",
                    budget.month, budget.category_id, budget.amount
                );
            }
        }
        BudgetCommand::Report { month } => {
            for line in engine.budget_report(month).await? {
                println!(
                    "{:<20} budget {:>10}  spent {:>10}  left {:>10}",
                    line.category, line.budget, line.spent, line.remaining
                );
            }
        }
    }
    Ok(())
}

fn format_transaction(tx: &Transaction) -> String {
    let status = match tx.status {
        Some(LoanStatus::Pending) => " [pending]",
        Some(LoanStatus::Settled) => " [settled]",
        None => "",
    };
    let recurring = tx
        .recurrence
        .map(|r| format!(" (every {})", r.frequency.as_str()))
        .unwrap_or_default();
    format!(
        "#{:<5} {} {:<16} {:>12}{status}{recurring} {}",
        tx.id,
        tx.effective_date,
        tx.kind.as_str(),
        tx.amount,
        tx.description
    )
}
