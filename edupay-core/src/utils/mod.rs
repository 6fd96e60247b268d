pub mod billing_window;
