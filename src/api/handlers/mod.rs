pub mod health;
pub mod learn;
pub mod linked_files;
pub mod open_in_overleaf;
pub mod proxy;
