use std::any::Any;

/// Text of a caught panic payload, for logging host callbacks that panicked
/// on a worker thread.
pub fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::panic;

    use super::*;

    #[test]
    fn reads_str_and_string_payloads() {
        let caught = panic::catch_unwind(|| panic!("static text")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static text");

        let code = 7;
        let caught = panic::catch_unwind(|| panic!("formatted {code}")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "formatted 7");

        let caught = panic::catch_unwind(|| panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "non-string panic payload");
    }
}
