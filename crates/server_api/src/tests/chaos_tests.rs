use super::*;

#[test]
fn disabled_chaos_never_fails_and_never_draws() {
    let coin = Arc::new(CountingCoin::new(FixedCoin(true)));
    let chaos = ChaosController::with_coin(Arc::clone(&coin));

    for _ in 0..100 {
        assert!(!chaos.should_fail(false));
    }
    assert_eq!(coin.flips(), 0);
}

#[test]
fn enabled_chaos_follows_the_coin() {
    assert!(ChaosController::with_coin(FixedCoin(true)).should_fail(true));
    assert!(!ChaosController::with_coin(FixedCoin(false)).should_fail(true));
}

#[test]
fn fair_coin_fails_about_half_the_time() {
    let chaos = ChaosController::new();
    let trials = 10_000;
    let failures = (0..trials).filter(|_| chaos.should_fail(true)).count();
    let rate = failures as f64 / trials as f64;
    assert!((0.45..=0.55).contains(&rate), "failure rate {rate}");
}
