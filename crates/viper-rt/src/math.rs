use viper_vm::{RuntimeContext, Trap, TrapKind};

/// `base ^ exp` with domain and overflow checks.
///
/// A negative base with a non-integral exponent has no real result and traps `DomainError`;
/// finite inputs producing an infinity trap `Overflow`.
pub fn pow_checked(rt: &RuntimeContext, base: f64, exp: f64) -> Result<f64, Trap> {
    if base < 0.0 && exp.is_finite() && exp.fract() != 0.0 {
        return Err(rt.trap(
            TrapKind::DomainError,
            format!("pow: negative base {base} with fractional exponent {exp}"),
        ));
    }
    let result = base.powf(exp);
    if result.is_infinite() && base.is_finite() && exp.is_finite() {
        return Err(rt.trap(TrapKind::Overflow, format!("pow: {base} ^ {exp} overflows")));
    }
    Ok(result)
}

pub fn sqrt_checked(rt: &RuntimeContext, x: f64) -> Result<f64, Trap> {
    if x < 0.0 {
        return Err(rt.trap(TrapKind::DomainError, format!("sqrt: negative operand {x}")));
    }
    Ok(x.sqrt())
}

pub fn abs_checked(rt: &RuntimeContext, x: i64) -> Result<i64, Trap> {
    x.checked_abs()
        .ok_or_else(|| rt.trap(TrapKind::Overflow, format!("abs: {x} has no positive counterpart")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use viper_vm::BufferSink;

    fn rt() -> RuntimeContext {
        RuntimeContext::new(Arc::new(BufferSink::new()))
    }

    #[test]
    fn pow_handles_integral_exponents_of_negative_bases() {
        let rt = rt();
        assert_eq!(pow_checked(&rt, 2.0, 5.0).unwrap(), 32.0);
        assert_eq!(pow_checked(&rt, -2.0, 3.0).unwrap(), -8.0);
        let trap = pow_checked(&rt, -2.0, 0.5).unwrap_err();
        assert_eq!(trap.kind, TrapKind::DomainError);
    }

    #[test]
    fn pow_overflow_traps() {
        let trap = pow_checked(&rt(), 10.0, 400.0).unwrap_err();
        assert_eq!(trap.kind, TrapKind::Overflow);
    }

    #[test]
    fn abs_of_min_traps() {
        let rt = rt();
        assert_eq!(abs_checked(&rt, -5).unwrap(), 5);
        assert_eq!(abs_checked(&rt, i64::MIN).unwrap_err().kind, TrapKind::Overflow);
        assert!(sqrt_checked(&rt, -1.0).is_err());
    }
}
