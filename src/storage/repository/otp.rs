// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One-time passcodes.
//!
//! Codes are 6 digits, stored only as a SHA-256 digest, and scoped to a
//! user, a purpose and a subject (the transaction reference they confirm).
//! Issuing a new code for a scope invalidates every earlier unused one.
//! Consuming a code is a single write transaction: check unused and
//! unexpired, then mark used. Two concurrent consumers of the same code
//! serialize on that transaction and exactly one of them wins.
//!
//! Each mismatch counts against the live code; after
//! [`MAX_FAILED_ATTEMPTS`] the code is burned and a new one must be issued.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::storage::ledger_db::{LedgerDatabase, StoreResult};

/// Wrong guesses tolerated before a live code is invalidated.
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Transfer,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Transfer => "transfer",
        }
    }
}

/// Stored OTP record. The plaintext code is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOtp {
    pub otp_id: String,
    pub user_id: String,
    pub purpose: OtpPurpose,
    pub subject: String,
    pub code_digest: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    #[serde(default)]
    pub failed_attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// A freshly issued code, handed to the notification channel.
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

fn digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.trim().as_bytes()))
}

fn scope_prefix(user_id: &str, purpose: OtpPurpose, subject: &str) -> String {
    format!("{user_id}|{}:{subject}", purpose.as_str())
}

/// Repository for OTP records.
pub struct OtpStore<'a> {
    db: &'a LedgerDatabase,
}

impl<'a> OtpStore<'a> {
    /// Create a new OtpStore.
    pub fn new(db: &'a LedgerDatabase) -> Self {
        Self { db }
    }

    /// Issue a new code for `(user, purpose, subject)`.
    pub fn issue(
        &self,
        user_id: &str,
        purpose: OtpPurpose,
        subject: &str,
        ttl: Duration,
    ) -> StoreResult<IssuedOtp> {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        self.issue_code(user_id, purpose, subject, &code, ttl)
    }

    pub(crate) fn issue_code(
        &self,
        user_id: &str,
        purpose: OtpPurpose,
        subject: &str,
        code: &str,
        ttl: Duration,
    ) -> StoreResult<IssuedOtp> {
        let now = Utc::now();
        let record = StoredOtp {
            otp_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            purpose,
            subject: subject.to_string(),
            code_digest: digest(code),
            expires_at: now + ttl,
            is_used: false,
            failed_attempts: 0,
            created_at: now,
        };
        let prefix = scope_prefix(user_id, purpose, subject);

        self.db.write(|batch| {
            for (key, mut earlier) in batch.otps_with_prefix(&prefix)? {
                if !earlier.is_used {
                    earlier.is_used = true;
                    batch.put_otp(&key, &earlier)?;
                }
            }
            batch.put_otp(&format!("{prefix}|{}", record.otp_id), &record)
        })?;

        debug!(user_id, purpose = purpose.as_str(), subject, "OTP issued");
        Ok(IssuedOtp {
            code: code.to_string(),
            expires_at: record.expires_at,
        })
    }

    /// Atomically check and consume `code`. Returns `false` if no unused,
    /// unexpired record matches; the mismatch is counted against live codes.
    pub fn consume(
        &self,
        user_id: &str,
        purpose: OtpPurpose,
        subject: &str,
        code: &str,
    ) -> StoreResult<bool> {
        let prefix = scope_prefix(user_id, purpose, subject);
        let wanted = digest(code);
        let now = Utc::now();

        self.db.write(|batch| {
            for (key, mut record) in batch.otps_with_prefix(&prefix)? {
                if record.is_used || record.expires_at <= now {
                    continue;
                }
                if record.code_digest == wanted {
                    record.is_used = true;
                    batch.put_otp(&key, &record)?;
                    return Ok(true);
                }
                record.failed_attempts += 1;
                if record.failed_attempts >= MAX_FAILED_ATTEMPTS {
                    record.is_used = true;
                    debug!(user_id, subject, "OTP burned after too many wrong attempts");
                }
                batch.put_otp(&key, &record)?;
            }
            Ok(false)
        })
    }
}
