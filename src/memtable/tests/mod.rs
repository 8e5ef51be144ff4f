mod tests_budget;
