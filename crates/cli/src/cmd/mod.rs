mod deploy;
mod graph;
mod info;
mod run;
mod snapshot;
mod store;

pub use deploy::cmd_deploy;
pub use graph::{GraphCommand, cmd_graph, cmd_order};
pub use info::cmd_info;
pub use run::{RunArgs, cmd_run};
pub use snapshot::{SnapshotCommand, cmd_snapshot};
pub use store::{StoreCommand, cmd_store};
