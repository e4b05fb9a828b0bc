pub type Result<T> = std::result::Result<T, crate::error::Error>;

#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidArgument {
        name: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use crate::ResultCode;

    fn checked_alignment(alignment: usize) -> crate::Result<usize> {
        verify_arg!(alignment, alignment == 0 || alignment.is_power_of_two());
        Ok(alignment)
    }

    #[test]
    fn test_verify_arg() {
        assert_eq!(checked_alignment(64).unwrap(), 64);
        let err = checked_alignment(24).unwrap_err();
        assert_eq!(err.code(), ResultCode::InvalidArgument);
        assert!(err.to_string().contains("alignment"));
    }
}
