mod strategy;

pub use strategy::{LeastConnections, RoundRobin, SelectError, Strategy};
