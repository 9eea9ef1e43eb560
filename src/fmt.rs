/// Format minor units (paise) as rupees with thousands separators: ₹1,234.56
pub fn money(minor: i64) -> String {
    let negative = minor < 0;
    let abs = minor.unsigned_abs();
    let int_part = (abs / 100).to_string();
    let dec_part = abs % 100;

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-₹{with_commas}.{dec_part:02}")
    } else {
        format!("₹{with_commas}.{dec_part:02}")
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(123456), "₹1,234.56");
        assert_eq!(money(-50000), "-₹500.00");
        assert_eq!(money(0), "₹0.00");
        assert_eq!(money(100000099), "₹1,000,000.99");
        assert_eq!(money(4210), "₹42.10");
        assert_eq!(money(5), "₹0.05");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
