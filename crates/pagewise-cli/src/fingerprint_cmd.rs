use crate::cli::LayoutArgs;
use crate::shared::report;

pub fn run(layout: &LayoutArgs) -> Result<(), i32> {
    let layout = layout.layout();
    layout.validate().map_err(report)?;
    println!("{}", layout.fingerprint());
    Ok(())
}
