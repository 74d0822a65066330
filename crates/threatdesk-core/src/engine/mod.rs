// Threatdesk Engine — intake, dispatch, session state and chat backends.

pub mod dispatch;
pub mod http;
pub mod intake;
pub mod ledger;
pub mod providers;
pub mod session;
