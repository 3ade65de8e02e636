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

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use warp_relayer_types::ObservedMessage;
use warp_relayer_utils::Result;

use crate::MessageSource;

struct PollState<M: ?Sized> {
    source: Arc<M>,
    next_height: u64,
    pending: VecDeque<ObservedMessage>,
    polling_interval: Duration,
}

/// A live feed for sources that can only answer range queries.
///
/// The feed starts right after the head at the time of the call and asks
/// the source for new blocks every `polling_interval`. Nothing is fetched
/// while the feed is not consumed, but no block is skipped either: the
/// next poll covers everything since the previous one.
pub async fn polling_subscription<M>(
    source: Arc<M>,
    polling_interval: Duration,
) -> Result<BoxStream<'static, Result<ObservedMessage>>>
where
    M: MessageSource + ?Sized + 'static,
{
    let head = source.head_height().await?;
    let state = PollState {
        source,
        next_height: head.saturating_add(1),
        pending: VecDeque::new(),
        polling_interval,
    };
    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(message) = state.pending.pop_front() {
                return Some((Ok(message), state));
            }
            tokio::time::sleep(state.polling_interval).await;
            let head = match state.source.head_height().await {
                Ok(head) => head,
                Err(e) => return Some((Err(e), state)),
            };
            if head < state.next_height {
                continue;
            }
            match state
                .source
                .messages_in_range(state.next_height, head)
                .await
            {
                Ok(mut found) => {
                    tracing::trace!(
                        from = state.next_height,
                        to = head,
                        "Polled #{} messages",
                        found.len()
                    );
                    found.sort_by_key(|m| m.position);
                    state.pending.extend(found);
                    state.next_height = head.saturating_add(1);
                }
                Err(e) => return Some((Err(e), state)),
            }
        }
    });
    Ok(stream.boxed())
}
