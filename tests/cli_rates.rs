use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

// ================================================================================================
// msagen rates
// ================================================================================================

#[test]
fn command_rates_gamma() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("msagen")?;
    let output = cmd
        .arg("rates")
        .arg("--alpha")
        .arg("0.5")
        .arg("--categories")
        .arg("4")
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;

    assert_eq!(stdout.lines().count(), 5);
    let rates: Vec<f64> = stdout
        .lines()
        .skip(1)
        .map(|l| l.split('\t').nth(1).unwrap().parse().unwrap())
        .collect();
    let expected = [0.0334, 0.2519, 0.8203, 2.8944];
    for (r, e) in rates.iter().zip(expected) {
        assert!((r - e).abs() < 1e-3, "{} vs {}", r, e);
    }
    assert!(!stdout.contains("#transition"));

    Ok(())
}

#[test]
fn command_rates_invariant() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("msagen")?;
    cmd.arg("rates")
        .arg("--categories")
        .arg("2")
        .arg("--pinv")
        .arg("0.25")
        .assert()
        .success()
        .stdout(predicate::str::contains("0\t0.000000\t0.250000"))
        .stdout(predicate::str::contains("0.375000"));

    Ok(())
}

#[test]
fn command_rates_correlated() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("msagen")?;
    let output = cmd
        .arg("rates")
        .arg("--alpha")
        .arg("1")
        .arg("--categories")
        .arg("4")
        .arg("--rho")
        .arg("0.5")
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[5], "#transition");
    let matrix: Vec<Vec<f64>> = lines[6..10]
        .iter()
        .map(|l| l.split('\t').map(|v| v.parse().unwrap()).collect())
        .collect();
    for (i, row) in matrix.iter().enumerate() {
        let sum: f64 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for j in 0..4 {
            assert!((row[j] - matrix[j][i]).abs() < 1e-5);
        }
    }
    assert!(lines[10].starts_with("#rho_dG\t"));
    let rho_dg: f64 = lines[10].split('\t').nth(1).unwrap().parse()?;
    assert!(rho_dg > 0.0 && rho_dg < 0.5);

    Ok(())
}

#[test]
fn command_rates_bad_input() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("msagen")?;
    cmd.arg("rates")
        .arg("--pinv")
        .arg("0.1")
        .arg("--rho")
        .arg("0.1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Incompatible options"));

    let mut cmd = Command::cargo_bin("msagen")?;
    cmd.arg("rates")
        .arg("--rho")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid parameter"));

    let mut cmd = Command::cargo_bin("msagen")?;
    cmd.arg("rates")
        .arg("--alpha")
        .arg("0")
        .assert()
        .failure();

    Ok(())
}
