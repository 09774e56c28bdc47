//! Named commands a host binds to keys or a palette.

use std::{
  fmt,
  str::FromStr,
};

use thiserror::Error;

use crate::{
  host::HostError,
  overlay::OverlayController,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
  Search,
  SelectResult,
  MoveSelectionUp,
  MoveSelectionDown,
  Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl Command {
  pub const ALL: [Command; 5] = [
    Command::Search,
    Command::SelectResult,
    Command::MoveSelectionUp,
    Command::MoveSelectionDown,
    Command::Close,
  ];

  pub const fn name(self) -> &'static str {
    match self {
      Command::Search => "telescope.search",
      Command::SelectResult => "telescope.selectResult",
      Command::MoveSelectionUp => "telescope.moveSelectionUp",
      Command::MoveSelectionDown => "telescope.moveSelectionDown",
      Command::Close => "telescope.close",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|command| command.name() == name)
  }

  pub async fn execute(self, overlay: &OverlayController) -> Result<(), HostError> {
    log::debug!("executing {self}");
    match self {
      Command::Search => overlay.show().await?,
      Command::SelectResult => {
        overlay.select_result().await;
      },
      Command::MoveSelectionUp => overlay.move_selection_up().await,
      Command::MoveSelectionDown => overlay.move_selection_down().await,
      Command::Close => overlay.close().await,
    }
    Ok(())
  }
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Command {
  type Err = UnknownCommand;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_name(s).ok_or_else(|| UnknownCommand(s.to_string()))
  }
}
