pub mod assignment;
pub mod customer;
pub mod driver;
pub mod notification;
pub mod order;
