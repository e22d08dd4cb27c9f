pub mod decrypt;
pub mod encrypt;
pub mod update;

pub use decrypt::decrypt;
pub use encrypt::encrypt;
pub use update::update;
