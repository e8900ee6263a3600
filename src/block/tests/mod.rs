mod tests_basic;
