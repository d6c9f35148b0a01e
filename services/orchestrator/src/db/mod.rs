//! SQL persistence (spec.md §3, §6 "Persistent state layout"). Built on
//! `sqlx::PgPool`, the same dependency the teacher's `api` and `pbx`
//! services already use.

pub mod calls;
pub mod users;

pub use calls::CallsRepository;
pub use users::UsersRepository;
