//! Menu sessions driven through a selector program
//!
//! The [`Navigator`] walks a stack of [`Frame`]s, rendering each one through a
//! [`Selector`] and applying the user's choice to the open database.

pub mod autotype;
pub mod frame;
pub mod navigator;
pub mod password;
pub mod scripted;
pub mod selector;

pub use autotype::AutotypeSequence;
pub use frame::{Frame, Menu, Selection, Transition};
pub use navigator::{show_error, MenuTools, Navigator, Outcome};
pub use password::gen_passwd;
pub use scripted::{Reply, ScriptedSelector};
pub use selector::{CommandSelector, Selector, SelectorError};
