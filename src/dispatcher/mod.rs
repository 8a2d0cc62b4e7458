pub mod broadcaster;
pub mod lamp;
pub mod queue;
#[cfg(test)]
pub mod test_device;
pub mod worker;

pub use lamp::Lamp;
pub use worker::WorkerSettings;
