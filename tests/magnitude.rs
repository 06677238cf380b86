use anyhow::Result;
use roiflow::frame::FlowField;
use roiflow::magnitude::{analyze_motion, percentile};
use roiflow::stats::Accumulator;

#[test]
fn test_percentile_interpolates() {
    let v = [5.0, 1.0, 4.0, 2.0, 3.0];
    assert!((percentile(&v, 95.0).unwrap() - 4.8).abs() < 1e-12);
    assert_eq!(percentile(&v, 50.0), Some(3.0));
    assert_eq!(percentile(&v, 100.0), Some(5.0));
    assert_eq!(percentile(&[2.5], 95.0), Some(2.5));
    assert_eq!(percentile(&[], 95.0), None);
}

#[test]
fn test_uniform_flow_statistic() -> Result<()> {
    let flow = FlowField::from_vec(10, 10, vec![[3.0, 4.0]; 100])?;
    let analysis = analyze_motion(&flow, 1.0, 95.0, 0.0698);
    assert_eq!(analysis.moving_pixels, 100);
    assert!((analysis.percentile_px - 5.0).abs() < 1e-6);
    assert!((analysis.distance - 5.0 * 0.0698).abs() < 1e-6);
    assert_eq!(analysis.magnitude.get(3, 7), 5.0);
    Ok(())
}

#[test]
fn test_noise_floor_is_strict() -> Result<()> {
    // magnitudes exactly at the floor don't count
    let flow = FlowField::from_vec(4, 4, vec![[1.0, 0.0]; 16])?;
    let analysis = analyze_motion(&flow, 1.0, 95.0, 0.0698);
    assert_eq!(analysis.moving_pixels, 0);
    assert_eq!(analysis.percentile_px, 0.0);
    assert_eq!(analysis.distance, 0.0);
    Ok(())
}

#[test]
fn test_only_moving_pixels_contribute() -> Result<()> {
    let mut flow = FlowField::zeros(20, 20);
    flow.put(1, 1, [2.0, 0.0]);
    flow.put(2, 2, [0.0, 4.0]);
    let analysis = analyze_motion(&flow, 1.0, 95.0, 1.0);
    assert_eq!(analysis.moving_pixels, 2);
    // 2 + (4 - 2) * 0.95
    assert!((analysis.percentile_px - 3.9).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_flow_length_mismatch() {
    assert!(FlowField::from_vec(3, 3, vec![[0.0, 0.0]; 8]).is_err());
}

#[test]
fn test_accumulator_is_monotonic() {
    let stats = [0.0, 0.35, 0.0, 1.2, 0.07];
    let mut acc = Accumulator::new();
    let mut last = acc;
    for (i, s) in stats.iter().enumerate() {
        acc = acc.accumulate(*s);
        assert_eq!(acc.frame_count, i + 1);
        assert!(acc.total_distance >= last.total_distance);
        last = acc;
    }
    assert!((acc.total_distance - 1.62).abs() < 1e-12);
}
