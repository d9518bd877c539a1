use std::sync::Arc;

/// Significant digits used when printing doubles.
const FLOAT_DIGITS: usize = 6;

pub fn concat(a: &str, b: &str) -> Arc<str> {
    let mut out = String::with_capacity(a.len() + b.len());
    out.push_str(a);
    out.push_str(b);
    out.into()
}

/// Length in bytes.
pub fn len(s: &str) -> i64 {
    s.len() as i64
}

/// Formats a double the way C's `%g` does: six significant digits, trailing zeros dropped,
/// scientific notation for very large or very small magnitudes.
pub fn format_f64(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    // Round to the target precision first; the exponent can shift (9.999995 -> 1e+01).
    let sci = format!("{:.*e}", FLOAT_DIGITS - 1, v);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= FLOAT_DIGITS as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.unsigned_abs())
    } else {
        let decimals = (FLOAT_DIGITS as i32 - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{v:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_percent_g() {
        assert_eq!(format_f64(32.0), "32");
        assert_eq!(format_f64(0.5), "0.5");
        assert_eq!(format_f64(1.0 / 3.0), "0.333333");
        assert_eq!(format_f64(123456.0), "123456");
        assert_eq!(format_f64(1234567.0), "1.23457e+06");
        assert_eq!(format_f64(0.0001), "0.0001");
        assert_eq!(format_f64(0.00001), "1e-05");
        assert_eq!(format_f64(-2.5), "-2.5");
        assert_eq!(format_f64(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn concat_and_len() {
        assert_eq!(&*concat("ab", "cd"), "abcd");
        assert_eq!(len("héllo"), 6);
    }
}
