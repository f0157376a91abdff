//! Job monitoring: the event hub, durable job logs and the HTTP surface.
//!
//! ## Module Map
//!
//! ```text
//!  Translator / workflow ──emit──> hub.rs (Hub, single writer loop)
//!                                     │            │
//!                        append JSONL │            │ fan out
//!                                     v            v
//!                          store.rs (JobLogStore)  Subscription (SSE / WebSocket)
//!                                     │
//!                    history/list/stats (stateless reads)
//!                                     v
//!                   api.rs / ws.rs (axum handlers) ── server.rs (router, page, shutdown)
//! ```
//!
//! | Module     | Responsibility                                            |
//! |------------|-----------------------------------------------------------|
//! | `event`    | `Event`, `EventType`, `EventData`                         |
//! | `hub`      | `Hub`, `Subscription`, `EventSink`                        |
//! | `store`    | `JobLogStore`, `JobSummary`, `JobStats`, `JobStatus` fold |
//! | `api`      | Job submission, history/list/stats, SSE feed, `ApiError`  |
//! | `ws`       | WebSocket live feed with ping/pong keepalive              |
//! | `embedded` | Monitoring page assets compiled in from `ui/`             |
//! | `server`   | `ServerConfig`, router assembly, page, graceful shutdown  |

pub mod api;
pub mod embedded;
pub mod event;
pub mod hub;
pub mod server;
pub mod store;
pub mod ws;

pub use event::{Event, EventData, EventType, data, new_job_id};
pub use hub::{EventSink, Hub, HubConfig, Subscription};
pub use store::{JobLogStore, JobStats, JobStatus, JobSummary};
