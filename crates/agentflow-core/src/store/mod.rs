pub mod agent_store;
pub mod instance_store;
pub mod template_store;

pub use agent_store::AgentStore;
pub use instance_store::InstanceStore;
pub use template_store::TemplateStore;
