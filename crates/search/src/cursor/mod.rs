//! Continuation cursors and revision-consistent paging.
//!
//! A paging run starts with [`NextUrlManager::first_page`], which snapshots the
//! storage revision and, when more results remain, stores a [`PagingData`]
//! record and returns an encrypted cursor. Each cursor carries the paging id,
//! the owning tenant, a [`SearchContext`] and the serialized query.
//!
//! | State     | Meaning                                              |
//! |-----------|------------------------------------------------------|
//! | Initial   | No cursor yet; the first page is being requested     |
//! | Paging    | A cursor was issued and more results may remain      |
//! | Exhausted | The last page was served without a next cursor       |
//! | Expired   | The paging state is gone; restart from page one      |
//! | Invalid   | The cursor failed to decrypt or decode               |

mod context;
mod encrypter;
mod manager;
mod paging;
mod store;
mod sweeper;

pub use context::{CursorPayload, SearchContext};
pub use encrypter::{CursorEncrypter, KEY_SIZE, generate_key};
pub use manager::{Clock, ManualClock, NextUrlManager, ResolvedCursor, SearchPage, SystemClock};
pub use paging::{CountResult, PagingData};
pub use store::{InMemoryPagingStore, PagingStore};
pub use sweeper::ExpirySweeper;
