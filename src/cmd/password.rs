//! Bulk password reset

use super::run::{BulkCommand, RunArgs, RunStatus};
use crate::engine::{ItemOperation, ItemOutcome, WorkItem};
use crate::error::Result;
use crate::graph::GraphClient;
use async_trait::async_trait;
use clap::Args;
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Column read for a caller-supplied password
pub const PASSWORD_COLUMN: &str = "Password";

const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%*-_=+?";

#[derive(Args, Debug)]
pub struct PasswordResetArgs {
    /// Require a password change at next sign-in
    #[arg(long)]
    pub force_change: bool,

    /// Write generated passwords into the report
    #[arg(long)]
    pub reveal_passwords: bool,

    /// Length of generated passwords
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u16).range(8..=256))]
    pub length: u16,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Random password with at least one character from each class
pub fn generate_password(length: usize) -> String {
    let classes = [UPPER, LOWER, DIGITS, SYMBOLS];
    let all: Vec<u8> = classes.concat();
    let mut rng = rand::thread_rng();

    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    while chars.len() < length {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}

pub struct PasswordResetOperation {
    client: Arc<GraphClient>,
    force_change: bool,
    reveal: bool,
    length: usize,
}

impl PasswordResetOperation {
    pub fn new(client: Arc<GraphClient>, force_change: bool, reveal: bool, length: usize) -> Self {
        Self {
            client,
            force_change,
            reveal,
            length,
        }
    }
}

#[async_trait]
impl ItemOperation for PasswordResetOperation {
    fn description(&self) -> String {
        "reset password".into()
    }

    async fn execute(&self, item: &WorkItem) -> Result<ItemOutcome> {
        let user_id = self.client.resolve_user_id(item).await?;

        let supplied = item
            .raw_record
            .get(PASSWORD_COLUMN)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let generated = supplied.is_none();
        let password = supplied.unwrap_or_else(|| generate_password(self.length));

        self.client
            .reset_password(&user_id, &password, self.force_change)
            .await?;

        let detail = match (generated, self.reveal) {
            (true, true) => format!("password: {}", password),
            (true, false) => "generated password set".to_string(),
            (false, _) => "password from input set".to_string(),
        };
        Ok(ItemOutcome::completed_with(detail))
    }
}

pub async fn reset(args: PasswordResetArgs, cancel: CancellationToken) -> Result<RunStatus> {
    let force_change = args.force_change;
    let reveal = args.reveal_passwords;
    let length = usize::from(args.length);

    BulkCommand {
        name: "password-reset",
        action: "Reset passwords",
        mutating: true,
        args: &args.run,
        all_users_fallback: false,
    }
    .execute(cancel, move |client| {
        Ok(Arc::new(PasswordResetOperation::new(
            client.clone(),
            force_change,
            reveal,
            length,
        )) as Arc<dyn ItemOperation>)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_password_covers_every_class() {
        for _ in 0..50 {
            let password = generate_password(12);
            assert_eq!(password.len(), 12);
            assert!(password.bytes().any(|b| UPPER.contains(&b)));
            assert!(password.bytes().any(|b| LOWER.contains(&b)));
            assert!(password.bytes().any(|b| DIGITS.contains(&b)));
            assert!(password.bytes().any(|b| SYMBOLS.contains(&b)));
        }
    }

    #[test]
    fn test_generated_passwords_differ() {
        assert_ne!(generate_password(16), generate_password(16));
    }
}
