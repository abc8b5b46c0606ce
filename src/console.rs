//! Terminal stand-in for the page: renders banners and feeds typed events.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::commands::{self, Input, COMMANDS};
use crate::monitor::{Banner, BannerAction, PageEvent, PageHost, UnsavedChanges};

/// Prints banners and reloads to stdout.
pub struct ConsoleHost;

impl PageHost for ConsoleHost {
  fn show_banner(&self, banner: &Banner) {
    let actions: Vec<&str> = banner
      .actions
      .iter()
      .map(|action| match action {
        BannerAction::Reload => "[reload]",
        BannerAction::Dismiss => "[dismiss]",
      })
      .collect();
    println!(
      "** {} (server version {}) {}",
      banner.message(),
      banner.version,
      actions.join(" ")
    );
  }

  fn hide_banner(&self) {
    println!("** banner dismissed");
  }

  fn reload(&self, bypass_cache: bool) {
    if bypass_cache {
      println!("** reloading (bypassing cache)");
    } else {
      println!("** reloading");
    }
  }
}

pub fn print_help() {
  for cmd in COMMANDS {
    println!("  {:<10} {:<18} {}", cmd.name, cmd.aliases.join(", "), cmd.description);
  }
}

/// Read commands from stdin until EOF or `quit`, forwarding page events.
pub async fn read_stdin(events: mpsc::UnboundedSender<PageEvent>, unsaved: UnsavedChanges) {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  while let Ok(Some(line)) = lines.next_line().await {
    match commands::parse(&line) {
      Some(Input::Page(event)) => {
        if events.send(event).is_err() {
          break;
        }
      }
      Some(Input::Unsaved(dirty)) => {
        debug!(dirty, "Unsaved changes signal");
        unsaved.set(dirty);
      }
      Some(Input::Help) => print_help(),
      Some(Input::Quit) => break,
      None if line.trim().is_empty() => {}
      None => println!("unknown command: {} (try help)", line.trim()),
    }
  }
}
