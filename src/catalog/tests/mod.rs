mod tests_types;
