use anyhow::Result;
use colored::*;
use serde_json::Value;

use datastore::data::{HasId, List};
use datastore::{CrudOutcome, Messenger};

/// Prints notices to stderr
pub struct ConsoleMessenger;

impl Messenger for ConsoleMessenger {
    fn notify_user(&self, message: &str) {
        eprintln!("{}", message.red().bold());
    }
}

pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_list(value: &Value) -> Result<()> {
    let Some(list) = List::from_value(value) else {
        return print_json(value);
    };
    for hit in &list.hits {
        let id = hit.id().unwrap_or("?");
        let name = hit.get("name").and_then(Value::as_str).unwrap_or("");
        println!("{}  {}", id.cyan(), name);
    }
    println!("{}", format!("{} of {} item(s)", list.hits.len(), list.total).dimmed());
    Ok(())
}

pub fn print_outcome(action: &str, type_tag: &str, id: &str, outcome: &CrudOutcome) -> Result<()> {
    match outcome {
        CrudOutcome::Done(item) => {
            println!("{}", format!("{} {} {}: done", action, type_tag, id).green().bold());
            print_json(item)?;
        }
        CrudOutcome::Unchanged => {
            println!("{}", format!("{} {} {}: nothing to do", action, type_tag, id).yellow());
        }
        CrudOutcome::Failed { message } => {
            println!("{}", format!("{} {} {}: {}", action, type_tag, id, message).red().bold());
        }
    }
    Ok(())
}
