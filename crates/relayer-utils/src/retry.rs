// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Retry policies for async calls.

use std::time::Duration;

use backoff::backoff::Backoff;

/// Constant with Max Retry Count is a backoff policy which always returns
/// a constant duration, until it exceeds the maximum retry count.
#[derive(Debug, Clone)]
pub struct ConstantWithMaxRetryCount {
    interval: Duration,
    max_retry_count: usize,
    count: usize,
}

impl ConstantWithMaxRetryCount {
    /// Creates a new Constant backoff with `interval` and `max_retry_count`.
    /// `interval` is the duration to wait between retries, and `max_retry_count` is the maximum
    /// number of retries, after which we return `None` to indicate that we should stop retrying.
    pub fn new(interval: Duration, max_retry_count: usize) -> Self {
        Self {
            interval,
            max_retry_count,
            count: 0,
        }
    }

    /// How many retries were handed out since the last reset.
    pub fn attempts(&self) -> usize {
        self.count
    }
}

impl Backoff for ConstantWithMaxRetryCount {
    fn next_backoff(&mut self) -> Option<Duration> {
        (self.count < self.max_retry_count).then(|| {
            self.count += 1;
            self.interval
        })
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn stops_after_max_retry_count() {
        let mut backoff =
            ConstantWithMaxRetryCount::new(Duration::from_millis(10), 2);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.attempts(), 2);
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn retries_transient_errors_only() {
        let calls = AtomicUsize::new(0);
        let backoff =
            ConstantWithMaxRetryCount::new(Duration::from_millis(1), 5);
        let result: Result<(), crate::Error> =
            backoff::future::retry(backoff, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(crate::Error::EmptySubnet {
                    subnet_id: "s".into(),
                }
                .into_backoff())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = AtomicUsize::new(0);
        let backoff =
            ConstantWithMaxRetryCount::new(Duration::from_millis(1), 3);
        let result: Result<(), crate::Error> =
            backoff::future::retry(backoff, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(crate::Error::SubscriptionClosed {
                    chain_id: "c".into(),
                }
                .into_backoff())
            })
            .await;
        assert!(matches!(
            result,
            Err(crate::Error::SubscriptionClosed { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
