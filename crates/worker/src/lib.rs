pub mod executors;


pub use executors::ShellExecutor;
