pub mod annotations;
pub mod tasks;
pub mod variable_pools;
pub mod workers;
pub mod workflows;
