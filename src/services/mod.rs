pub mod glb;
pub mod orchestrator;
pub mod provider;
pub mod ssrf;
pub mod storage;
