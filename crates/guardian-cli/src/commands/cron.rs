use clap::Args;
use colored::Colorize;
use guardian_backup::CronExpression;

#[derive(Args)]
pub struct CronCommand {
    /// Five-field cron expression or descriptor such as @daily
    expression: String,

    /// How many fire times to show
    #[arg(long, short = 'n', default_value_t = 5)]
    count: usize,
}

impl CronCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let expression = CronExpression::parse(&self.expression)
            .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", self.expression, e))?;

        let upcoming = expression.upcoming(chrono::Utc::now(), self.count);
        println!();
        println!(
            "{} {}",
            "Schedule:".bright_white().bold(),
            expression.as_str().bright_cyan()
        );
        if upcoming.is_empty() {
            println!("  {}", "Never fires".bright_yellow());
        }
        for (i, at) in upcoming.iter().enumerate() {
            println!("  {:>2}. {}", i + 1, at.format("%a %Y-%m-%d %H:%M UTC"));
        }
        println!();
        Ok(())
    }
}
