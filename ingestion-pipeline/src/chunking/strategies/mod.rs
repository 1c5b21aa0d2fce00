pub mod administrative;
pub mod conversation;
pub mod fallback;
pub mod legal;
pub mod menus;
pub mod pages;
pub mod reviews;
pub mod sections;
pub mod tables;
