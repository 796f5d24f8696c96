//! Service fee schedule shown on the panel

/// (upper bound in USD cents, exclusive; fee in USD cents), checked in order.
const TIERS: [(u64, u64); 4] = [(500, 0), (1_000, 30), (5_000, 70), (25_000, 100)];
/// Fee for trades of $250 and above.
const TOP_FEE_CENTS: u64 = 200;

fn dollars(cents: u64) -> String {
    if cents % 100 == 0 {
        format!("${}", cents / 100)
    } else {
        format!("${}.{:02}", cents / 100, cents % 100)
    }
}

/// Panel text: how the service works plus the fee table.
pub fn panel_description() -> String {
    let mut lines = vec![
        "**Automated middleman service**".to_string(),
        "Pick the currency you are trading below. You will be asked who you are trading with \
         and what each side gives; a private channel is then opened for both of you."
            .to_string(),
        String::new(),
        "**Fees**".to_string(),
        format!("Deals {} and over: {}", dollars(25_000), dollars(TOP_FEE_CENTS)),
    ];
    for (bound, fee) in TIERS.iter().rev() {
        let fee = if *fee == 0 {
            "free".to_string()
        } else {
            dollars(*fee)
        };
        lines.push(format!("Deals under {}: {}", dollars(*bound), fee));
    }
    lines.join("\n")
}
