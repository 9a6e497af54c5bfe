use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate};
use rollcall_core::utils::{format_date_key, parse_date_key};
use rollcall_core::{
    fetch_classes, fetch_history, AttendanceAggregator, Config, HistoryFilter, MemoryStore,
    RosterSnapshot, SchoolClass, SchoolTotals, SnapshotCommitter, StatusToggle, SubscriptionManager,
};
use tracing::{debug, warn};

/// How long to wait for live rosters before giving up.
/// The local store answers immediately; this only guards against a stuck stream.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

pub const USAGE: &str = "\
Usage: rollcall <command>

Commands:
  counts                          Present/absent/total per class and school total
  roster <class_id>               Class roster sorted by name
  toggle <class_id> <student_id>  Flip a student between present and absent
  commit <class_id> [YYYY-MM-DD]  Save the day's attendance (default: today)
  history [class_id]              Committed attendance records, newest first
  help                            Show this message

Configuration: ~/.config/rollcall/config.json, or ROLLCALL_SCHOOL_ID,
ROLLCALL_DATA_FILE and ROLLCALL_LOG_DIR in the environment or a .env file.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Counts,
    Roster { class_id: String },
    Toggle { class_id: String, student_id: String },
    Commit { class_id: String, date: Option<NaiveDate> },
    History { class_id: Option<String> },
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let arg = |i: usize, name: &str| -> Result<String> {
            args.get(i)
                .cloned()
                .ok_or_else(|| anyhow!("Missing <{}>\n\n{}", name, USAGE))
        };

        let command = match args.first().map(String::as_str) {
            None | Some("help") | Some("--help") | Some("-h") => Command::Help,
            Some("counts") => Command::Counts,
            Some("roster") => Command::Roster {
                class_id: arg(1, "class_id")?,
            },
            Some("toggle") => Command::Toggle {
                class_id: arg(1, "class_id")?,
                student_id: arg(2, "student_id")?,
            },
            Some("commit") => {
                let date = match args.get(2) {
                    Some(raw) => Some(
                        parse_date_key(raw)
                            .ok_or_else(|| anyhow!("Invalid date '{}', expected YYYY-MM-DD", raw))?,
                    ),
                    None => None,
                };
                Command::Commit {
                    class_id: arg(1, "class_id")?,
                    date,
                }
            }
            Some("history") => Command::History {
                class_id: args.get(1).cloned(),
            },
            Some(other) => bail!("Unknown command '{}'\n\n{}", other, USAGE),
        };
        Ok(command)
    }
}

/// Run a command. Returns true when the store was written to.
pub async fn run(
    command: Command,
    store: Arc<MemoryStore>,
    school_id: &str,
    config: &Config,
) -> Result<bool> {
    match command {
        Command::Counts => {
            show_counts(store, school_id, config.update_buffer).await?;
            Ok(false)
        }
        Command::Roster { class_id } => {
            show_roster(store, school_id, &class_id).await?;
            Ok(false)
        }
        Command::Toggle {
            class_id,
            student_id,
        } => {
            toggle_student(store, school_id, &class_id, &student_id).await?;
            Ok(true)
        }
        Command::Commit { class_id, date } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            commit_attendance(store, school_id, &class_id, date).await?;
            Ok(true)
        }
        Command::History { class_id } => {
            show_history(store, school_id, class_id).await?;
            Ok(false)
        }
        Command::Help => Ok(false),
    }
}

async fn find_class(store: &MemoryStore, school_id: &str, class_id: &str) -> Result<SchoolClass> {
    fetch_classes(store, school_id)
        .await?
        .into_iter()
        .find(|c| c.id == class_id)
        .ok_or_else(|| anyhow!("Class '{}' not found in school '{}'", class_id, school_id))
}

/// Subscribe to a class roster and wait for its first full emission.
async fn load_roster(
    manager: &SubscriptionManager<MemoryStore>,
    school_id: &str,
    class_id: &str,
) -> Result<RosterSnapshot> {
    let mut roster = manager
        .subscribe(school_id, class_id)?
        .ok_or_else(|| anyhow!("Class id must not be empty"))?;

    loop {
        let snapshot = tokio::time::timeout(SETTLE_TIMEOUT, roster.next())
            .await
            .context("Timed out waiting for class roster")?
            .ok_or_else(|| anyhow!("Roster stream closed"))?;
        if snapshot.loaded {
            debug!(class_id, count = snapshot.students.len(), "Roster loaded");
            return Ok(snapshot);
        }
        if let Some(e) = snapshot.error {
            bail!("Roster unavailable: {}", e);
        }
    }
}

async fn show_counts(store: Arc<MemoryStore>, school_id: &str, buffer: usize) -> Result<()> {
    let classes = fetch_classes(store.as_ref(), school_id).await?;
    if classes.is_empty() {
        println!("No classes in school '{}'", school_id);
        return Ok(());
    }

    let manager = SubscriptionManager::new(Arc::clone(&store));
    let mut aggregator = AttendanceAggregator::with_buffer(school_id, manager, buffer);
    for class in &classes {
        if let Err(e) = aggregator.track(&class.id) {
            warn!(class_id = %class.id, error = %e, "Could not follow class roster, skipping");
        }
    }
    while !aggregator.is_settled() {
        if tokio::time::timeout(SETTLE_TIMEOUT, aggregator.next_update())
            .await
            .is_err()
        {
            warn!("Timed out waiting for class rosters, showing what has arrived");
            break;
        }
    }

    let totals = aggregator.totals();
    print_counts(&classes, &totals);
    Ok(())
}

fn print_counts(classes: &[SchoolClass], totals: &SchoolTotals) {
    println!(
        "{:<28} {:>7} {:>7} {:>7} {:>7}",
        "CLASS", "PRESENT", "ABSENT", "UNSET", "TOTAL"
    );
    for class in classes {
        let Some(counts) = totals.classes.get(&class.id) else {
            println!("{:<28} (unavailable)", class.display_name());
            continue;
        };
        let marker = if totals.stale.contains(&class.id) { " (stale)" } else { "" };
        println!(
            "{:<28} {:>7} {:>7} {:>7} {:>7}{}",
            class.display_name(),
            counts.present,
            counts.absent,
            counts.unset(),
            counts.total,
            marker
        );
    }
    println!("Grand total: {}", totals.grand_total);
}

async fn show_roster(store: Arc<MemoryStore>, school_id: &str, class_id: &str) -> Result<()> {
    let class = find_class(&store, school_id, class_id).await?;
    let manager = SubscriptionManager::new(Arc::clone(&store));
    let snapshot = load_roster(&manager, school_id, class_id).await?;

    println!("{} ({})", class.display_name(), class.id);
    if let Some(ref teacher) = class.teacher {
        println!("Teacher: {}", teacher.name);
    }
    for student in snapshot.sorted() {
        println!(
            "  {:<6} {:<28} {:<8} [{}]",
            student.roll_number.as_deref().unwrap_or("-"),
            student.name,
            student.status.map(|s| s.as_str()).unwrap_or("-"),
            student.id
        );
    }
    let counts = snapshot.counts();
    println!(
        "Present {} / Absent {} / Total {}",
        counts.present, counts.absent, counts.total
    );
    Ok(())
}

async fn toggle_student(
    store: Arc<MemoryStore>,
    school_id: &str,
    class_id: &str,
    student_id: &str,
) -> Result<()> {
    let manager = SubscriptionManager::new(Arc::clone(&store));
    let snapshot = load_roster(&manager, school_id, class_id).await?;
    let student = snapshot
        .students
        .iter()
        .find(|s| s.id == student_id)
        .ok_or_else(|| anyhow!("Student '{}' not found in class '{}'", student_id, class_id))?;

    let written = StatusToggle::new(store)
        .toggle(school_id, class_id, student)
        .await?;
    println!(
        "{}: {} -> {}",
        student.name,
        student.status.map(|s| s.as_str()).unwrap_or("unset"),
        written
    );
    Ok(())
}

async fn commit_attendance(
    store: Arc<MemoryStore>,
    school_id: &str,
    class_id: &str,
    date: NaiveDate,
) -> Result<()> {
    let class = find_class(&store, school_id, class_id).await?;
    let manager = SubscriptionManager::new(Arc::clone(&store));
    let snapshot = load_roster(&manager, school_id, class_id).await?;

    let record = SnapshotCommitter::new(store)
        .commit_daily_attendance(
            school_id,
            class_id,
            class.display_name(),
            &snapshot.students,
            date,
        )
        .await?;
    println!(
        "Saved attendance for {} on {}: {} present, {} absent, {} total (record {})",
        record.class_name,
        format_date_key(record.date),
        record.present,
        record.absent,
        record.total,
        record.id
    );
    Ok(())
}

async fn show_history(
    store: Arc<MemoryStore>,
    school_id: &str,
    class_id: Option<String>,
) -> Result<()> {
    let filter = HistoryFilter {
        class_id,
        ..HistoryFilter::default()
    };
    let history = fetch_history(store.as_ref(), school_id, &filter).await?;
    if history.is_empty() {
        println!("No attendance records");
        return Ok(());
    }
    for record in history {
        println!(
            "{}  {:<28} {:>3}/{:<3} present ({:.0}%)  [{}]",
            format_date_key(record.date),
            record.class_name,
            record.present,
            record.total,
            record.attendance_rate(),
            record.id
        );
    }
    Ok(())
}
