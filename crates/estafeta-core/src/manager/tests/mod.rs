mod common;

mod lifecycle;
mod priority;
mod transactions;
