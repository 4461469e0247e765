// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for wallet history first-page lookups.
//!
//! Caches the first page of transactions per wallet to avoid repeated redb
//! reads for the most common query pattern. The settlement engine
//! invalidates a wallet's entry after every commit that touches it.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::repository::transactions::TransactionPage;

/// Cached entry: first page, the page size it was read with, and insertion time.
struct CacheEntry {
    page: TransactionPage,
    limit: usize,
    inserted_at: Instant,
}

/// In-process LRU cache for hot wallet history lookups.
pub struct TxCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl TxCache {
    /// Create a new cache with the given capacity and TTL.
    ///
    /// - `capacity`: Max number of wallets to cache.
    /// - `ttl`: Time-to-live for each cache entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// Get the cached first page for a wallet.
    ///
    /// Returns `None` if not cached, cached with another page size, or expired.
    pub fn get_first_page(&self, wallet_id: &str, limit: usize) -> Option<TransactionPage> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(wallet_id) {
            if entry.inserted_at.elapsed() < self.ttl {
                return (entry.limit == limit).then(|| entry.page.clone());
            }
            // Expired
            cache.pop(wallet_id);
        }
        None
    }

    /// Store the first page for a wallet.
    pub fn put_first_page(&self, wallet_id: &str, limit: usize, page: TransactionPage) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                wallet_id.to_string(),
                CacheEntry {
                    page,
                    limit,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Invalidate the cache for a specific wallet.
    pub fn invalidate(&self, wallet_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(wallet_id);
        }
    }
}
