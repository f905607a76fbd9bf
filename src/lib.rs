//! agentssh: an MCP server for running commands on SSH-reachable hosts.
//!
//! Commands are launched detached on the remote host with their output
//! spooled to files, so a tool call never has to block for the lifetime of
//! the command. Later calls read the spools in bounded chunks, poll
//! liveness, or kill the process.

pub mod config;
pub mod hosts;
pub mod policy;
pub mod process;
pub mod registry;
pub mod server;
pub mod session;
