pub mod assembly;

pub use assembly::AssemblyClient;
